pub mod id;
pub mod error;
pub mod primitive;
pub mod topology;
pub mod options;
pub mod node;
pub mod order;
pub mod program;
pub mod surgery;

// Re-export commonly used types
pub use id::{NodeKey, PrimitiveId};
pub use error::{CoreError, LoadError};
pub use primitive::{
    ActivationFunc, EltwiseMode, Format, Layout, Padding, PoolingMode, Primitive, PrimitiveKind,
    PrimitiveType, Shape, SplitOutput, Window,
};
pub use topology::Topology;
pub use options::{BuildOptions, MemoryDependencyStrategy, QueueType};
pub use node::{DependencyEdge, ProgramNode};
pub use order::{OrderSource, ProcessingOrder};
pub use program::{NodeList, Program};
