//! Shared utilities for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use tablestream::{
    PlanId,
    StreamMessage,
    message::{
        IncomingStreamMessage,
        StreamInitMessage,
        StreamMessageHeader,
        StreamOperation,
        TableId,
    },
};
use tablestream_testing::test_peer;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initiating message for session 0 of `plan_id` from the test peer.
pub fn init(plan_id: PlanId) -> StreamMessage {
    StreamInitMessage::new(test_peer(), 0, plan_id, StreamOperation::Repair).into()
}

/// Data message for session 0 of `plan_id` carrying `payload`.
pub fn incoming(plan_id: PlanId, sequence_number: u32, payload: &[u8]) -> StreamMessage {
    let header = StreamMessageHeader {
        table_id: TableId::random(),
        sender: test_peer(),
        plan_id,
        session_index: 0,
        sequence_number,
        repaired_at: 0,
        pending_repair: None,
    };
    IncomingStreamMessage::new(header, payload.to_vec()).into()
}
