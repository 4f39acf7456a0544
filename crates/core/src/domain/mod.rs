pub mod campaign;
pub mod conversation;
pub mod goal;
pub mod knowledge;
pub mod lead;
