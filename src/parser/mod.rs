pub mod blocks;
pub mod rich_text;

pub use blocks::{parse_blocks, Block, BulletItem};
pub use rich_text::TextSpan;
