pub mod logger;
pub mod object_storage;
pub mod readable_size;
pub mod runtime;

pub mod num_cpus {
    pub use num_cpus::get;
    pub use num_cpus::get_physical;
}
