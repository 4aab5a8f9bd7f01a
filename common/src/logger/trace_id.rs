use uuid::Uuid;

/// Correlation id that follows one run through every symbol worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceId(String);

impl TraceId {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self(Uuid::new_v4().as_hyphenated().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TraceId::default(), TraceId::default());
    }

    #[test]
    fn explicit_id_round_trips() {
        assert_eq!(TraceId::new("replay-1").as_str(), "replay-1");
    }
}
