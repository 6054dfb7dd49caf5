//! Topic registry.
//!
//! Every service names its topics `<service>.<operation>_req` for requests
//! and `<service>.<operation>_res` for replies. The registry is built once at
//! startup and never changes afterwards; looking up an operation it does not
//! know is a configuration mistake and should surface before the service
//! starts handling traffic.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{Result, RpcError, Topic};

/// Operation registered by every service for connectivity checks.
pub const TEST_REQUEST_REPLY: &str = "test_request_reply";

/// Operation registered by every service for listing its entities.
pub const LIST: &str = "list";

/// Which side of an exchange a topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `<service>.<operation>_req`
    Request,
    /// `<service>.<operation>_res`
    Reply,
}

impl Direction {
    /// Topic name suffix for this direction.
    pub const fn suffix(self) -> &'static str {
        match self {
            Direction::Request => "_req",
            Direction::Reply => "_res",
        }
    }
}

/// The deployed services and their topic prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Auth,
    Destination,
    Route,
    Generic,
}

impl Service {
    /// Topic prefix, without the trailing dot.
    pub const fn prefix(self) -> &'static str {
        match self {
            Service::Auth => "auth",
            Service::Destination => "destination",
            Service::Route => "route",
            Service::Generic => "generic",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Build the topic for `operation` of `service` in the given direction.
///
/// ```
/// # use topic_rpc::{topic_for, Direction};
/// assert_eq!(
///     topic_for("generic", "test_request_reply", Direction::Request).as_str(),
///     "generic.test_request_reply_req"
/// );
/// ```
pub fn topic_for(service: &str, operation: &str, direction: Direction) -> Topic {
    Topic::from(format!("{service}.{operation}{}", direction.suffix()))
}

/// Request and reply topic of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTopics {
    pub request: Topic,
    pub reply: Topic,
}

impl OperationTopics {
    fn new(service: &str, operation: &str) -> Self {
        Self {
            request: topic_for(service, operation, Direction::Request),
            reply: topic_for(service, operation, Direction::Reply),
        }
    }

    /// The topic for `direction`.
    pub fn get(&self, direction: Direction) -> &Topic {
        match direction {
            Direction::Request => &self.request,
            Direction::Reply => &self.reply,
        }
    }
}

/// Immutable operation → topics table for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRegistry {
    service: Arc<str>,
    operations: BTreeMap<String, OperationTopics>,
}

impl TopicRegistry {
    /// Start building a registry for `service` (the topic prefix).
    pub fn builder(service: impl Into<String>) -> TopicRegistryBuilder {
        TopicRegistryBuilder {
            service: service.into(),
            operations: Vec::new(),
        }
    }

    /// The registry every deployed service carries: `test_request_reply`
    /// and `list`.
    pub fn standard(service: Service) -> Self {
        // ---
        let service_name: Arc<str> = Arc::from(service.prefix());
        let operations = [TEST_REQUEST_REPLY, LIST]
            .into_iter()
            .map(|op| (op.to_string(), OperationTopics::new(&service_name, op)))
            .collect();

        Self {
            service: service_name,
            operations,
        }
    }

    /// The service prefix.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Topics of `operation`.
    pub fn operation(&self, operation: &str) -> Result<&OperationTopics> {
        self.operations
            .get(operation)
            .ok_or_else(|| RpcError::UnknownOperation {
                service: self.service.to_string(),
                operation: operation.to_string(),
            })
    }

    /// Topic of `operation` in `direction`.
    pub fn topic(&self, operation: &str, direction: Direction) -> Result<&Topic> {
        self.operation(operation).map(|topics| topics.get(direction))
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// All request topics, sorted by operation.
    pub fn request_topics(&self) -> Vec<Topic> {
        self.operations.values().map(|t| t.request.clone()).collect()
    }

    /// All reply topics, sorted by operation.
    pub fn reply_topics(&self) -> Vec<Topic> {
        self.operations.values().map(|t| t.reply.clone()).collect()
    }
}

/// Builder for [`TopicRegistry`].
pub struct TopicRegistryBuilder {
    service: String,
    operations: Vec<String>,
}

impl TopicRegistryBuilder {
    /// Register an operation.
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operations.push(name.into());
        self
    }

    /// Validate and freeze the registry.
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidConfig`] for an empty name, a name containing `.`
    /// or whitespace, or an operation registered twice.
    pub fn build(self) -> Result<TopicRegistry> {
        // ---
        validate_name("service", &self.service)?;

        let mut operations = BTreeMap::new();
        for op in self.operations {
            validate_name("operation", &op)?;
            let topics = OperationTopics::new(&self.service, &op);
            if operations.insert(op.clone(), topics).is_some() {
                return Err(RpcError::InvalidConfig(format!(
                    "operation {op} registered twice for service {}",
                    self.service
                )));
            }
        }

        Ok(TopicRegistry {
            service: Arc::from(self.service),
            operations,
        })
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    // ---
    if name.is_empty() {
        return Err(RpcError::InvalidConfig(format!("{kind} name is empty")));
    }
    if name.contains('.') || name.chars().any(char::is_whitespace) {
        return Err(RpcError::InvalidConfig(format!(
            "{kind} name {name:?} must not contain '.' or whitespace"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_standard_topic_names() {
        // ---
        let generic = TopicRegistry::standard(Service::Generic);
        assert_eq!(
            generic
                .topic(TEST_REQUEST_REPLY, Direction::Request)
                .unwrap()
                .as_str(),
            "generic.test_request_reply_req"
        );
        assert_eq!(
            generic
                .topic(TEST_REQUEST_REPLY, Direction::Reply)
                .unwrap()
                .as_str(),
            "generic.test_request_reply_res"
        );
        assert_eq!(
            generic.topic(LIST, Direction::Request).unwrap().as_str(),
            "generic.list_req"
        );
        assert_eq!(
            generic.topic(LIST, Direction::Reply).unwrap().as_str(),
            "generic.list_res"
        );
    }

    #[test]
    fn test_service_prefixes() {
        // ---
        for (service, prefix) in [
            (Service::Auth, "auth"),
            (Service::Destination, "destination"),
            (Service::Route, "route"),
            (Service::Generic, "generic"),
        ] {
            let registry = TopicRegistry::standard(service);
            assert_eq!(registry.service(), prefix);
            for topic in registry
                .request_topics()
                .iter()
                .chain(registry.reply_topics().iter())
            {
                assert!(topic.as_str().starts_with(&format!("{prefix}.")));
            }
        }
    }

    #[test]
    fn test_unknown_operation() {
        // ---
        let route = TopicRegistry::standard(Service::Route);
        let err = route.topic("delete", Direction::Request).unwrap_err();
        assert!(matches!(
            err,
            RpcError::UnknownOperation { ref service, ref operation }
                if service == "route" && operation == "delete"
        ));
    }

    #[test]
    fn test_builder_rejects_bad_names() {
        // ---
        assert!(TopicRegistry::builder("").build().is_err());
        assert!(TopicRegistry::builder("route")
            .operation("a.b")
            .build()
            .is_err());
        assert!(TopicRegistry::builder("route")
            .operation("get by id")
            .build()
            .is_err());
        assert!(TopicRegistry::builder("route")
            .operation("get")
            .operation("get")
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_topics_sorted() {
        // ---
        let registry = TopicRegistry::builder("destination")
            .operation("search")
            .operation("get_by_id")
            .build()
            .unwrap();
        assert_eq!(
            registry.operations().collect::<Vec<_>>(),
            ["get_by_id", "search"]
        );
        assert_eq!(
            registry.reply_topics(),
            vec![
                Topic::from("destination.get_by_id_res"),
                Topic::from("destination.search_res"),
            ]
        );
    }
}
