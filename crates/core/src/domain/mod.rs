pub mod approval;
pub mod lease;
pub mod quotation;
pub mod sequence;
