//! Scenario 5 — concurrent refresh singleflight: two callers request a
//! token for the same user at once when it's within the refresh margin of
//! expiring. Exactly one upstream refresh call must happen; both callers
//! observe the refreshed token.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockUpstreamClient, TestHarness};
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn two_concurrent_callers_trigger_exactly_one_refresh(ctx: &TestHarness) {
    let upstream = Arc::new(MockUpstreamClient::always_ok().with_refresh_delay(Duration::from_millis(50)));
    let tokens = ctx.tokens(upstream.clone());

    // expires_at is within REFRESH_MARGIN (30s), forcing both callers down
    // the refresh path rather than returning the cached access token.
    ctx.insert_user("u1", "stale-access", "rt-1", Duration::from_secs(1)).await;

    let (first, second) =
        tokio::join!(tokens.get_valid_access_token("u1"), tokens.get_valid_access_token("u1"));

    let first = first.expect("first caller should obtain a token");
    let second = second.expect("second caller should obtain a token");

    assert_eq!(upstream.refresh_call_count(), 1, "only one refresh RPC should have been issued");
    assert_eq!(first, second, "both callers should observe the refreshed token");
    assert_eq!(first, "refreshed-rt-1");
}
