//! Mutable state shared by every operation of one client.

/// Lifetime flags of the client object itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    /// Callbacks validated; cleared by every disconnect
    pub initialized: bool,
    /// No connect has ever been accepted
    pub first_connect: bool,
    /// The transport reported the link as lost
    pub network_disconnected: bool,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            initialized: false,
            first_connect: true,
            network_disconnected: false,
        }
    }
}

/// State of the current broker session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub connected: bool,
    /// Set from the moment a disconnect starts until the next connect attempt
    pub disconnecting: bool,
    /// Effective keep-alive period negotiated by the last accepted CONNECT
    pub keep_alive_ms: u32,
}

impl SessionState {
    pub fn is_usable(&self) -> bool {
        self.connected && !self.disconnecting
    }
}

/// Filters the broker acknowledged, kept sorted and deduplicated.
///
/// Survives reconnects that report a present session; cleared otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilters {
    filters: Vec<String>,
}

impl SubscriptionFilters {
    pub fn insert(&mut self, filter: &str) {
        if let Err(pos) = self.search(filter) {
            self.filters.insert(pos, filter.to_string());
        }
    }

    pub fn remove(&mut self, filter: &str) -> bool {
        match self.search(filter) {
            Ok(pos) => {
                self.filters.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.search(filter).is_ok()
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(String::as_str)
    }

    fn search(&self, filter: &str) -> Result<usize, usize> {
        self.filters.binary_search_by(|f| f.as_str().cmp(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_sorted_and_deduplicated() {
        let mut filters = SubscriptionFilters::default();
        filters.insert("b/#");
        filters.insert("a/+");
        filters.insert("b/#");
        filters.insert("c");
        assert_eq!(filters.iter().collect::<Vec<_>>(), vec!["a/+", "b/#", "c"]);
        assert_eq!(filters.len(), 3);
    }

    #[test]
    fn test_filters_remove() {
        let mut filters = SubscriptionFilters::default();
        filters.insert("a");
        assert!(filters.contains("a"));
        assert!(filters.remove("a"));
        assert!(!filters.remove("a"));
        assert!(filters.is_empty());
    }

    #[test]
    fn test_fresh_client_state() {
        let state = ClientState::default();
        assert!(state.first_connect);
        assert!(!state.initialized);
        let session = SessionState::default();
        assert!(!session.is_usable());
    }
}
