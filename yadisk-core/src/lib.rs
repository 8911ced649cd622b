mod client;

pub use client::{
    ApiErrorClass, DISK_ROOT, DiskInfo, Link, OperationStatus, Resource, ResourceList,
    ResourceType, YadiskClient, YadiskError,
};
