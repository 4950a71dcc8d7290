//! Parsing of Kubernetes resource quantities ("250m", "64Mi", "1e3")

/// Parse a quantity into its base unit
#[must_use]
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let number = number.parse::<f64>().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024_f64,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        "Ei" => 1024_f64.powi(6),
        exp => {
            let exponent = exp.strip_prefix(['e', 'E'])?.parse::<i32>().ok()?;
            10_f64.powi(exponent)
        }
    };
    Some(number * multiplier)
}

/// CPU quantity in millicores
#[must_use]
pub fn parse_cpu(quantity: &str) -> Option<f64> {
    parse_quantity(quantity).map(|cores| cores * 1000.0)
}

/// Memory quantity in bytes
#[must_use]
pub fn parse_memory(quantity: &str) -> Option<f64> {
    parse_quantity(quantity)
}
