/// Format a float as rupees with Indian digit grouping: ₹12,34,567.89
pub fn money(val: f64) -> String {
    let negative = val < 0.0;
    let paise = format!("{:.2}", val.abs());
    let (int_part, dec_part) = paise.split_once('.').unwrap_or((paise.as_str(), "00"));

    // Last three digits, then pairs (lakh, crore, ...).
    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    let head_len = digits.len().saturating_sub(3);
    for (i, c) in digits[..head_len].iter().enumerate() {
        if i > 0 && (head_len - i) % 2 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }
    if head_len > 0 {
        grouped.push(',');
    }
    grouped.extend(&digits[head_len..]);

    if negative {
        format!("-₹{grouped}.{dec_part}")
    } else {
        format!("₹{grouped}.{dec_part}")
    }
}

pub fn optional_money(val: Option<f64>) -> String {
    val.map(money).unwrap_or_default()
}
