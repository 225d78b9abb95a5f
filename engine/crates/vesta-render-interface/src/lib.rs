pub mod cmd_allocator;
pub mod deletion_ring;
pub mod frame_counter;
pub mod phase_deletion;
pub mod resource_registry;
pub mod scene;
pub mod uniform_arena;
