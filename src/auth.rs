/// Optional shared secret every hook request must carry.
#[derive(Debug, Clone, Default)]
pub struct TokenAuth {
    token: Option<String>,
}

impl TokenAuth {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Always true when no token is configured.
    pub fn verify(&self, presented: Option<&str>) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };
        let Some(presented) = presented else {
            return false;
        };
        constant_time_eq::constant_time_eq(expected.as_bytes(), presented.as_bytes())
    }
}
