//! Gate 17 (quality): rolling-window rate limiter.
//!
//! Registered last so blocks from earlier gates never inflate the window.
//! Analytics tools are read-only and not counted.

use crate::gates::{Gate, GateContext};
use crate::state::SessionState;
use crate::types::{GateResult, GateTier};

pub const NAME: &str = "GATE 17: RATE LIMIT";

const BLOCK_THRESHOLD: f64 = 60.0;
const WARN_THRESHOLD: f64 = 40.0;
const WINDOW_SECONDS: f64 = 120.0;
const MAX_WINDOW_ENTRIES: usize = 200;

const ANALYTICS_TOOL_PREFIX: &str = "mcp__analytics__";

pub struct RateLimit;

impl Gate for RateLimit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tier(&self) -> GateTier {
        GateTier::Quality
    }

    fn check(&self, ctx: &GateContext, state: &mut SessionState) -> GateResult {
        if !ctx.event.is_pre_tool() {
            return GateResult::pass(NAME);
        }
        if ctx.event.tool_name.starts_with(ANALYTICS_TOOL_PREFIX) {
            return GateResult::pass(NAME);
        }

        let now = ctx.now;
        state.rate_window_timestamps.push(now);
        let cutoff = now - WINDOW_SECONDS;
        state.rate_window_timestamps.retain(|t| *t > cutoff);
        let len = state.rate_window_timestamps.len();
        if len > MAX_WINDOW_ENTRIES {
            state.rate_window_timestamps.drain(..len - MAX_WINDOW_ENTRIES);
        }

        let recent = state.rate_window_timestamps.len();
        if recent <= 1 {
            return GateResult::pass(NAME);
        }

        // Rate over the actual span of the retained calls, floored at six
        // seconds so a fast burst right after session start can't divide
        // by (almost) zero.
        let oldest = state
            .rate_window_timestamps
            .iter()
            .fold(now, |min, t| if *t < min { *t } else { min });
        let span_secs = (now - oldest).max(6.0);
        let windowed_rate = recent as f64 / (span_secs / 60.0);
        let block_threshold = state.tune("rate_limit", "block_threshold", BLOCK_THRESHOLD);

        if windowed_rate > block_threshold {
            return GateResult::block(
                NAME,
                format!(
                    "[{NAME}] BLOCKED: Tool call rate is {windowed_rate:.1} calls/min \
                     ({recent} calls in {WINDOW_SECONDS:.0}s window, limit: \
                     {block_threshold:.0}/min). Slow down — consider batching work or \
                     waiting before the next call."
                ),
            );
        }

        if windowed_rate > WARN_THRESHOLD {
            return GateResult::warn(
                NAME,
                format!(
                    "[{NAME}] WARNING: Tool call rate is {windowed_rate:.1} calls/min \
                     ({recent} calls in {WINDOW_SECONDS:.0}s window, warn: \
                     {WARN_THRESHOLD:.0}/min). Consider slowing down."
                ),
            );
        }

        GateResult::pass(NAME)
    }
}
