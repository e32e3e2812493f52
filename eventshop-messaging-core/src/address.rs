// eventshop-messaging-core/src/address.rs
use std::fmt;

use crate::MessagingError;

/// Trailing type-name suffix replaced by [`EVENT_SEGMENT`].
pub const CONSUMER_SUFFIX: &str = "Consumer";
pub const EVENT_SEGMENT: &str = ".event";
pub const ADDRESS_VERSION: &str = "v1";

/// Stable name of a consumer type, used to derive its queue address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity {
    name: String,
    type_path: String,
}

impl ConsumerIdentity {
    /// Identity of a Rust type: `shop::orders::OrderShippedConsumer` -> `OrderShippedConsumer`.
    pub fn of<T: ?Sized>() -> Self {
        let type_path = std::any::type_name::<T>();
        Self {
            name: short_type_name(type_path).to_string(),
            type_path: type_path.to_string(),
        }
    }

    /// Explicit queue name for consumer type `T`. The type path is still
    /// recorded, so two types claiming the same name stay distinct.
    pub fn named<T: ?Sized>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_path: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified path; distinguishes types whose short names coincide.
    pub fn type_path(&self) -> &str {
        &self.type_path
    }

    pub fn resolve(&self, prefix: &str) -> Result<String, MessagingError> {
        resolve(&self.name, prefix)
    }

    /// Same Rust type under the same name.
    pub fn is_same_consumer(&self, other: &ConsumerIdentity) -> bool {
        self == other
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if short_type_name(&self.type_path) == self.name {
            f.write_str(&self.type_path)
        } else {
            write!(f, "{} ({})", self.name, self.type_path)
        }
    }
}

/// Canonical queue address for a consumer type name under an environment prefix.
///
/// `ProductCreatedConsumer` under `dev` becomes `dev.productcreated.event.v1`.
/// Names without the `Consumer` suffix are kept as they are, so `Audit` under
/// `dev` becomes `dev.audit.v1`. The prefix is used verbatim.
pub fn resolve(type_name: &str, prefix: &str) -> Result<String, MessagingError> {
    Ok(format!(
        "{}.{}.{}",
        prefix,
        event_segment(type_name)?,
        ADDRESS_VERSION
    ))
}

/// Lowercased middle segment of an address, e.g. `productcreated.event`.
pub fn event_segment(type_name: &str) -> Result<String, MessagingError> {
    validate_identifier(type_name)?;

    let segment = match type_name.strip_suffix(CONSUMER_SUFFIX) {
        Some("") => return Err(MessagingError::InvalidIdentifier(type_name.to_string())),
        Some(base) => format!("{base}{EVENT_SEGMENT}"),
        None => type_name.to_string(),
    };
    Ok(segment.to_lowercase())
}

fn validate_identifier(type_name: &str) -> Result<(), MessagingError> {
    let valid = !type_name.is_empty()
        && type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MessagingError::InvalidIdentifier(type_name.to_string()))
    }
}

fn short_type_name(type_path: &str) -> &str {
    let without_generics = type_path
        .split_once('<')
        .map_or(type_path, |(head, _)| head);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}
