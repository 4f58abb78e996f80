pub mod claude;
pub mod error;
pub mod traits;
pub mod util;

pub use claude::{Claude, Completion};
pub use error::AiError;
pub use traits::{split_system, Message, MessageRole};
pub use util::{strip_code_blocks, strip_wrapping_quotes, truncate_to_char_boundary};
