//! Topic naming.
//!
//! Names are derived from the deployment scope so several deployments can
//! share one bus without crosstalk.

/// Topic names for one deployment scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    scope: String,
}

impl Topics {
    pub fn new(scope: impl Into<String>) -> Self {
        Self { scope: scope.into() }
    }

    /// Scheduler to worker, one topic per execution region
    pub fn dispatch(&self, region: &str) -> String {
        format!("{}-monitor-dispatch-{}", self.scope, region)
    }

    /// Worker to escalation engine
    pub fn post_request(&self) -> String {
        format!("{}-monitor-postrequest", self.scope)
    }

    /// Worker to on-demand coordinator
    pub fn ondemand_response(&self) -> String {
        format!("{}-monitor-ondemand-response", self.scope)
    }

    /// Map a push route kind back to its topic name.
    ///
    /// Kinds are `postrequest`, `ondemand-response` and `dispatch-{region}`.
    pub fn from_kind(&self, kind: &str) -> Option<String> {
        match kind {
            "postrequest" => Some(self.post_request()),
            "ondemand-response" => Some(self.ondemand_response()),
            _ => kind
                .strip_prefix("dispatch-")
                .filter(|region| !region.is_empty())
                .map(|region| self.dispatch(region)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        let topics = Topics::new("prod");
        assert_eq!(topics.dispatch("eu-west"), "prod-monitor-dispatch-eu-west");
        assert_eq!(topics.post_request(), "prod-monitor-postrequest");
        assert_eq!(topics.ondemand_response(), "prod-monitor-ondemand-response");

        // Different regions have different topics
        assert_ne!(topics.dispatch("us-east"), topics.dispatch("eu-west"));
    }

    #[test]
    fn test_kind_lookup() {
        let topics = Topics::new("prod");
        assert_eq!(topics.from_kind("postrequest").as_deref(), Some("prod-monitor-postrequest"));
        assert_eq!(
            topics.from_kind("dispatch-us-east").as_deref(),
            Some("prod-monitor-dispatch-us-east")
        );
        assert_eq!(topics.from_kind("dispatch-"), None);
        assert_eq!(topics.from_kind("unknown"), None);
    }
}
