//! Candidate port sequences
//!
//! Parses port expressions such as `6881-6999` or `6881,6885-6889` into an
//! ordered list of candidates. Values are kept as parsed, including ones
//! outside the valid port range; the listener skips those when binding.

use crate::error::{EngineError, Result};

/// Largest number of candidates a single `lo-hi` range may expand to
const MAX_RANGE_SPAN: i64 = 1 << 20;

/// Ordered, drainable collection of candidate ports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSequence {
    values: Vec<i32>,
}

impl PortSequence {
    /// Parse a comma-separated list of ports and inclusive `lo-hi` ranges
    pub fn parse(expr: &str) -> Result<Self> {
        let mut values = Vec::new();

        for part in expr.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = parse_value(lo)?;
                    let hi = parse_value(hi)?;
                    if lo > hi {
                        return Err(EngineError::invalid_input(
                            "listen_port",
                            format!("Range start {} is greater than end {}", lo, hi),
                        ));
                    }
                    if i64::from(hi) - i64::from(lo) >= MAX_RANGE_SPAN {
                        return Err(EngineError::invalid_input(
                            "listen_port",
                            format!("Range {}-{} is too large", lo, hi),
                        ));
                    }
                    values.extend(lo..=hi);
                }
                None => values.push(parse_value(part)?),
            }
        }

        Ok(Self { values })
    }

    /// Number of candidates currently held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the sequence holds no candidates
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take every candidate out of the sequence, leaving it empty
    pub fn flush(&mut self) -> Vec<i32> {
        std::mem::take(&mut self.values)
    }

    /// Candidates in parse order
    pub fn values(&self) -> &[i32] {
        &self.values
    }
}

impl From<Vec<i32>> for PortSequence {
    fn from(values: Vec<i32>) -> Self {
        Self { values }
    }
}

/// Whether `value` names a port we may bind
pub fn is_valid_port(value: i32) -> bool {
    0 < value && value <= 65535
}

fn parse_value(s: &str) -> Result<i32> {
    s.trim().parse::<i32>().map_err(|_| {
        EngineError::invalid_input("listen_port", format!("Invalid port number: {:?}", s))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let seq = PortSequence::parse("6881-6889").unwrap();
        assert_eq!(seq.len(), 9);
        assert_eq!(seq.values()[0], 6881);
        assert_eq!(seq.values()[8], 6889);
    }

    #[test]
    fn test_parse_mixed() {
        let seq = PortSequence::parse("6881, 6885-6887,7000").unwrap();
        assert_eq!(seq.values(), &[6881, 6885, 6886, 6887, 7000]);
    }

    #[test]
    fn test_parse_keeps_out_of_range_values() {
        let seq = PortSequence::parse("0,65535-65537").unwrap();
        assert_eq!(seq.values(), &[0, 65535, 65536, 65537]);
        let valid: Vec<_> = seq.values().iter().copied().filter(|&p| is_valid_port(p)).collect();
        assert_eq!(valid, vec![65535]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(PortSequence::parse("abc").is_err());
        assert!(PortSequence::parse("6890-6880").is_err());
        assert!(PortSequence::parse("1-2000000000").is_err());
    }

    #[test]
    fn test_empty_expression() {
        assert!(PortSequence::parse("").unwrap().is_empty());
        assert!(PortSequence::parse(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_flush_drains() {
        let mut seq = PortSequence::from(vec![1, 2, 3]);
        assert_eq!(seq.flush(), vec![1, 2, 3]);
        assert!(seq.is_empty());
        assert!(seq.flush().is_empty());
    }
}
