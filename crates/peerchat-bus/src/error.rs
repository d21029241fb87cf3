/// Errors returned by the bus layer.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    #[error("invalid topic filter: {0:?}")]
    InvalidFilter(String),

    #[error("client id {0:?} is already connected")]
    ClientIdInUse(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("client is disconnected")]
    Disconnected,

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_topic() {
        let err = BusError::InvalidTopic("a/#".into());
        assert_eq!(err.to_string(), "invalid topic: \"a/#\"");
    }

    #[test]
    fn display_message_too_large() {
        let err = BusError::MessageTooLarge { size: 10, max: 4 };
        assert_eq!(err.to_string(), "message too large: 10 bytes (max 4)");
    }

    #[test]
    fn display_client_id_in_use() {
        let err = BusError::ClientIdInUse("alice".into());
        assert_eq!(err.to_string(), "client id \"alice\" is already connected");
    }
}
