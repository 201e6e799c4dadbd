//! Cache position policy: prefix retention between prompts, sliding-window
//! shifts during generation, and the history trim that keeps the logical
//! token log aligned with a bounded cache.

use crate::engine::{Engine, EngineError, Token};


/// Length of the longest shared prefix of two token sequences.
pub fn common_prefix(a: &[Token], b: &[Token]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Keep the cache cells shared with `next`, drop the divergent tail.
/// Returns the shared length; the caller prefills only `next[shared..]`.
pub fn retain_prefix<E: Engine>(
    engine: &mut E,
    prev: &[Token],
    next: &[Token],
) -> Result<usize, EngineError> {
    let shared = common_prefix(prev, next);
    if shared == 0 {
        engine.kv_clear();
    } else if shared < prev.len() {
        engine.kv_remove(shared, None)?;
    }
    tracing::debug!("prefix retain: {shared} of {} cached tokens reused", prev.len());
    Ok(shared)
}

/// Discard the oldest cells and renumber the survivors down so that the next
/// decode lands inside `[0, window)`. Returns the adjusted position; when
/// the backend cannot shift, the position is returned untouched and the next
/// decode surfaces the cache-full failure instead.
pub fn slide_window<E: Engine>(
    engine: &mut E,
    cur_pos: usize,
    window: usize,
) -> Result<usize, EngineError> {
    if !engine.kv_can_shift() {
        return Ok(cur_pos);
    }
    let discard = cur_pos - (window - 1);
    engine.kv_remove(0, Some(discard))?;
    engine.kv_shift(discard, cur_pos, -(discard as i32))?;
    tracing::trace!("window shift: discarded {discard} cells at position {cur_pos}");
    Ok(cur_pos - discard)
}

/// Trim the logical token log to the trailing `window` entries.
pub fn trim_history(history: &mut Vec<Token>, window: usize) {
    if window > 0 && history.len() > window {
        history.drain(..history.len() - window);
    }
}
