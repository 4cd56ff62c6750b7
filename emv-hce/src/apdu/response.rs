//! Response APDUs: data followed by the SW1 SW2 trailer

use super::status::SW;

/// What the responder sends back for one command
///
/// # Example
/// ```ignore
/// let gpo = Response::success(vec![0x80, 0x06, 0x08, 0x80, 0x08, 0x01, 0x01, 0x01]);
/// assert!(gpo.is_okay());
///
/// let refused = Response::error(SW::CONDITIONS_NOT_SATISFIED);
/// assert_eq!(refused.to_bytes(), vec![0x69, 0x85]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    status: u16,
}

impl Response {
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self { data, status: sw }
    }

    /// Data with 9000
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, SW::SUCCESS)
    }

    /// Bare status word, no data
    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Terminal side: split what came back from the card
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        let sw = SW::trailer(raw)?;
        Some(Self::new(raw[..raw.len() - 2].to_vec(), sw))
    }

    pub fn is_okay(&self) -> bool {
        SW::is_success(self.status)
    }

    pub fn sw(&self) -> u16 {
        self.status
    }

    /// Wire form: data ‖ SW1 ‖ SW2
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        out.extend_from_slice(&SW::to_bytes(self.status));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let resp = Response::success(vec![0x77, 0x00]);
        assert!(resp.is_okay());
        assert_eq!(resp.sw(), SW::SUCCESS);
        assert_eq!(resp.to_bytes(), vec![0x77, 0x00, 0x90, 0x00]);
    }

    #[test]
    fn test_error_response_has_no_data() {
        let resp = Response::error(SW::CONDITIONS_NOT_SATISFIED);
        assert!(!resp.is_okay());
        assert!(resp.data.is_empty());
        assert_eq!(resp.to_bytes(), vec![0x69, 0x85]);
    }

    #[test]
    fn test_from_bytes() {
        let resp = Response::from_bytes(&[0x80, 0x00, 0x6A, 0x82]).unwrap();
        assert_eq!(resp.data, vec![0x80, 0x00]);
        assert_eq!(resp.sw(), SW::FILE_NOT_FOUND);
        assert!(Response::from_bytes(&[0x90]).is_none());
    }
}
