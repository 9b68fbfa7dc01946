use crate::error::BoxError;

/// Turns the raw bytes of a source file into an artifact.
///
/// Implementations must be pure: identical bytes must always produce equal artifacts, since
/// cached results are reused purely on the basis of a content hash.
pub trait Parser<A> {
    fn parse(&self, bytes: &[u8]) -> Result<A, BoxError>;
}

impl<A, E, F> Parser<A> for F
where
    F: Fn(&[u8]) -> Result<A, E>,
    E: Into<BoxError>,
{
    fn parse(&self, bytes: &[u8]) -> Result<A, BoxError> {
        self(bytes).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LineCount;

    impl Parser<usize> for LineCount {
        fn parse(&self, bytes: &[u8]) -> Result<usize, BoxError> {
            Ok(bytes.iter().filter(|&&b| b == b'\n').count())
        }
    }

    #[test]
    fn closures_and_structs_are_parsers() {
        let utf8 = |bytes: &[u8]| std::str::from_utf8(bytes).map(str::to_owned);
        assert_eq!(utf8.parse(b"abc").unwrap(), "abc");
        assert!(utf8.parse(&[0xff]).is_err());

        assert_eq!(LineCount.parse(b"a\nb\n").unwrap(), 2);
    }
}
