mod common;
mod extension;
