// Moodboard — a product-inspiration canvas: arrange image elements on a
// board, persist the layout, flatten it to a PNG, and hand the collage to an
// inpaint service for a generated inspiration shot.

pub mod app;
pub mod board;
pub mod cli;
pub mod generate;
pub mod logger;
pub mod persist;
pub mod render;
pub mod settings;
pub mod tools;
