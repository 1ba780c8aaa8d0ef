pub mod clock;
pub mod locks;
