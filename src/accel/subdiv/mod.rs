mod lazy_patch_builder;
mod patch;
mod subdiv_accel;
mod subdiv_mesh;
mod tessellation;

pub use lazy_patch_builder::{LazyBuildCounters, LazyPatchBuilder, PatchBuildState, PatchState, QuadLeaf};
pub use patch::{BSplinePatch, BilinearPatch, GregoryPatch, Patch};
pub use subdiv_accel::SubdivAccel;
pub use subdiv_mesh::{PatchLeaf, SubdivMesh};
pub use tessellation::{grid_uv_tessellator, RegularGridLookUpTables, MAX_SUBDIVISION_LEVEL};
