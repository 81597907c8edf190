/// Pretty print a byte count with a binary suffix, for progress output.
pub fn pretty_size(size_in_bytes: u64) -> String {
    const SUFFIXES: [(&str, u64); 5] = [
        ("B", 1 << 10),
        ("K", 1 << 20),
        ("M", 1 << 30),
        ("G", 1 << 40),
        ("T", 1 << 50),
    ];

    for (suffix, limit) in SUFFIXES {
        if size_in_bytes < limit {
            return format!("{:.2}{}", size_in_bytes as f64 / (limit >> 10) as f64, suffix);
        }
    }
    let (suffix, limit) = SUFFIXES[SUFFIXES.len() - 1];
    format!("{:.2}{}", size_in_bytes as f64 / (limit >> 10) as f64, suffix)
}

#[cfg(test)]
mod test_pretty_size {
    use super::*;

    #[test]
    fn bytes() {
        assert_eq!(pretty_size(0), "0.00B");
        assert_eq!(pretty_size(512), "512.00B");
    }

    #[test]
    fn kibibytes() {
        assert_eq!(pretty_size(2048), "2.00K");
        assert_eq!(pretty_size(616_448), "602.00K");
    }

    #[test]
    fn mebibytes() {
        assert_eq!(pretty_size(1_048_576), "1.00M");
        assert_eq!(pretty_size(160_000_000), "152.59M");
    }
}
