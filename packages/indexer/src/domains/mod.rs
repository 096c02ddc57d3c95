// Domain layers: business logic only, infrastructure stays in the kernel.

pub mod git_local;
pub mod indexing;
pub mod tokens;
