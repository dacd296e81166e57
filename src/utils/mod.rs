pub mod vint;
