use eventshop_messaging_core::{resolve, ConsumerIdentity, MessagingError};

#[test]
fn consumer_suffix_becomes_event_segment() {
    assert_eq!(
        resolve("ProductCreatedConsumer", "dev").unwrap(),
        "dev.productcreated.event.v1"
    );
    assert_eq!(
        resolve("OrderShippedConsumer", "prod").unwrap(),
        "prod.ordershipped.event.v1"
    );
}

#[test]
fn resolution_is_deterministic() {
    let first = resolve("PaymentCapturedConsumer", "staging").unwrap();
    let second = resolve("PaymentCapturedConsumer", "staging").unwrap();
    assert_eq!(first, second);
}

#[test]
fn name_without_suffix_is_used_unmodified() {
    assert_eq!(resolve("AuditTrail", "dev").unwrap(), "dev.audittrail.v1");
}

#[test]
fn prefix_is_not_normalized() {
    assert_eq!(
        resolve("ProductCreatedConsumer", "EU-West").unwrap(),
        "EU-West.productcreated.event.v1"
    );
}

#[test]
fn empty_name_is_invalid() {
    assert!(matches!(
        resolve("", "dev"),
        Err(MessagingError::InvalidIdentifier(_))
    ));
}

#[test]
fn malformed_name_is_invalid() {
    for name in ["Product Created", "orders.Consumer", "Cart-Consumer"] {
        assert!(
            matches!(resolve(name, "dev"), Err(MessagingError::InvalidIdentifier(_))),
            "{name} should be rejected"
        );
    }
}

struct StockDepletedConsumer;
struct LegacyStockHandler;

#[test]
fn identity_of_type_matches_named_identity_address() {
    let typed = ConsumerIdentity::of::<StockDepletedConsumer>();
    let named = ConsumerIdentity::named::<LegacyStockHandler>("StockDepletedConsumer");

    assert_eq!(typed.name(), "StockDepletedConsumer");
    assert_ne!(typed.type_path(), named.type_path());
    assert_eq!(typed.resolve("dev").unwrap(), named.resolve("dev").unwrap());
}
