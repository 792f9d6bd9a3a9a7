//! Arabic text normalization shared by every matching and alignment step.

mod normalize;

pub use normalize::{is_clitic, is_tiny_segment, normalize, normalize_for_match, tokens, word_len};
