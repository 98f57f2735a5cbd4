mod bpe;
mod bytes;
mod error;
mod ext;
mod utils;
mod vocab;

pub use bpe::*;
pub use bytes::*;
pub use error::*;
pub use ext::*;
pub use utils::*;
pub use vocab::*;

pub type Token = String;
pub type TokenId = u32;
pub type StringPair = (String, String);

use anyhow::Result;

pub trait Tokenizer: Send + Sync {
    fn encode(&self, string: &str) -> Result<Vec<TokenId>>;
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;
}
