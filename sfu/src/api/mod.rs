//! `API`/`APIBuilder`: carried forward from the teacher's builder
//! pattern (§10.5), now assembling an [`Agent`] instead of one
//! browser-facing `RTCPeerConnection`.

use crate::agent::Agent;

/// Bundles the global construction knobs for the engine, mirroring the
/// teacher's `API` object: a single place that owns defaults
/// (worker count, STUN URI) and hands out configured `Agent`s.
pub struct API {
    num_workers: usize,
    stun_uri: Option<String>,
}

impl API {
    pub fn new_agent(&self) -> Agent {
        Agent::new(self.num_workers)
    }

    pub fn stun_uri(&self) -> Option<&str> {
        self.stun_uri.as_deref()
    }
}

#[derive(Default)]
pub struct APIBuilder {
    num_workers: Option<usize>,
    stun_uri: Option<String>,
}

impl APIBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    pub fn with_stun_uri(mut self, stun_uri: String) -> Self {
        self.stun_uri = Some(stun_uri);
        self
    }

    pub fn build(self) -> API {
        API {
            num_workers: self.num_workers.unwrap_or(1),
            stun_uri: self.stun_uri,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_one_worker() {
        let api = APIBuilder::new().build();
        let agent = api.new_agent();
        assert!(agent.is_empty());
    }
}
