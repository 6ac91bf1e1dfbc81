use proptest::prelude::*;
use provisioner_core::models::Checkpoint;

/// Strategy for generating a single valid DNS label
pub fn dns_label_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?"
}

/// Strategy for generating valid top-level labels (never all digits)
pub fn tld_strategy() -> impl Strategy<Value = String> {
    "[a-z]{2,10}"
}

/// Strategy for generating valid domain names of two to four labels
pub fn domain_name_strategy() -> impl Strategy<Value = String> {
    (prop::collection::vec(dns_label_strategy(), 1..4), tld_strategy())
        .prop_map(|(labels, tld)| format!("{}.{}", labels.join("."), tld))
}

/// Strategy for generating labels that can never be valid
pub fn invalid_label_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "-[a-z0-9]{1,10}",
        "[a-z0-9]{1,10}-",
        "[a-z0-9]{0,5}[_ !@#$%][a-z0-9]{0,5}",
        "[a-z]{64,70}",
    ]
}

pub fn checkpoint_strategy() -> impl Strategy<Value = Checkpoint> {
    prop_oneof![
        Just(Checkpoint::DomainAdded),
        Just(Checkpoint::DomainVerified),
        Just(Checkpoint::DnsConfigured),
        Just(Checkpoint::SigningCnamesAdded),
        Just(Checkpoint::SigningEnabled),
    ]
}

/// Store operations that must never clear a checkpoint flag
#[derive(Debug, Clone)]
pub enum StoreOp {
    Mark(Checkpoint),
    MarkAddedAndVerified,
    IncrementRetry,
    RecordFailure,
    RecordSigningDeferred,
    RecordSigningRetryFailure,
    Requeue,
}

pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => checkpoint_strategy().prop_map(StoreOp::Mark),
        1 => Just(StoreOp::MarkAddedAndVerified),
        1 => Just(StoreOp::IncrementRetry),
        1 => Just(StoreOp::RecordFailure),
        1 => Just(StoreOp::RecordSigningDeferred),
        1 => Just(StoreOp::RecordSigningRetryFailure),
        1 => Just(StoreOp::Requeue),
    ]
}
