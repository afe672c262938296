pub mod canonical;
pub mod dashscope;
pub mod gemini;
pub mod messages;
pub mod openai_chat;
pub mod prompts;
