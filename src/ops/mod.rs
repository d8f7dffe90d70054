pub mod ai;
pub mod brush;
pub mod composite;
pub mod filters;
pub mod lasso;
pub mod magic_wand;
pub mod perspective;
pub mod refine;
pub mod transform;
