//! Text-generation and web-search backends shared by the analyst roles.
//!
//! `openclaw` wraps the single configurable LLM endpoint all three
//! analyst roles call through; `tavily` wraps the web search capability
//! the research and base-rate roles use.

pub mod openclaw;
pub mod tavily;
