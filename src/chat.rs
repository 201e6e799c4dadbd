//! Chat-markup prompt wrapping for models trained on `<|im_start|>` turns.


pub const DEFAULT_SYSTEM: &str = "You are nox. Be helpful, accurate, and concise.";

const COT_SUFFIX: &str =
    "Think step by step and show your reasoning. End with a final short answer.";

/// Wrap a user prompt in a full system/user/assistant template. `cot`
/// extends the system turn with the reasoning instruction.
pub fn wrap(user: &str, system: Option<&str>, cot: bool) -> String {
    let mut system_text = system.unwrap_or(DEFAULT_SYSTEM).to_string();
    if cot {
        system_text.push(' ');
        system_text.push_str(COT_SUFFIX);
    }
    format!(
        "<|im_start|>system\n{system_text}\n<|im_end|>\n\
         <|im_start|>user\n{user}\n<|im_end|>\n\
         <|im_start|>assistant\n"
    )
}

/// Continuation turn: the system block is already resident in the cache.
pub fn wrap_continuation(user: &str) -> String {
    format!("<|im_start|>user\n{user}\n<|im_end|>\n<|im_start|>assistant\n")
}
