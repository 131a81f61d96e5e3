//! Primitive descriptors and tensor geometry.
//!
//! A [`Primitive`] is the immutable description of one layer of the network as
//! the topology front end hands it over: an id, a [`PrimitiveKind`] carrying the
//! kind-specific parameters, and the ids of its inputs. The compiler never
//! interprets a primitive beyond what graph rewriting needs: its type tag,
//! its input list and its output geometry.
//!
//! # Geometry
//!
//! Tensors are 4-D: [`Shape`] holds `batch`, `features`, `y`, `x`. Spatial
//! arrays (`[u32; 2]`) are always ordered `[x, y]`. [`Padding`] describes the
//! extra border a producer must allocate around its output so that a consumer
//! can read past the edges without bounds checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::PrimitiveId;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Memory layout order of a 4-D tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Bfyx,
    Yxfb,
    Byxf,
}

/// Logical size of a 4-D tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub batch: u32,
    pub features: u32,
    pub y: u32,
    pub x: u32,
}

impl Shape {
    pub fn new(batch: u32, features: u32, y: u32, x: u32) -> Self {
        Shape {
            batch,
            features,
            y,
            x,
        }
    }

    /// Spatial extent as `[x, y]`.
    pub fn spatial(&self) -> [u32; 2] {
        [self.x, self.y]
    }

    /// Number of elements.
    pub fn count(&self) -> u64 {
        u64::from(self.batch) * u64::from(self.features) * u64::from(self.y) * u64::from(self.x)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{}", self.batch, self.features, self.y, self.x)
    }
}

/// Spatial border around a tensor, `[x, y]` on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Padding {
    #[serde(default)]
    pub lower: [u32; 2],
    #[serde(default)]
    pub upper: [u32; 2],
}

impl Padding {
    pub fn new(lower: [u32; 2], upper: [u32; 2]) -> Self {
        Padding { lower, upper }
    }

    pub fn is_zero(&self) -> bool {
        self.lower == [0, 0] && self.upper == [0, 0]
    }

    /// Element-wise maximum of two paddings.
    pub fn max(a: Padding, b: Padding) -> Padding {
        Padding {
            lower: [a.lower[0].max(b.lower[0]), a.lower[1].max(b.lower[1])],
            upper: [a.upper[0].max(b.upper[0]), a.upper[1].max(b.upper[1])],
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "l[{},{}] u[{},{}]",
            self.lower[0], self.lower[1], self.upper[0], self.upper[1]
        )
    }
}

/// Format, size and padding of a node's output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub format: Format,
    pub shape: Shape,
    #[serde(default)]
    pub padding: Padding,
}

impl Layout {
    pub fn new(format: Format, shape: Shape) -> Self {
        Layout {
            format,
            shape,
            padding: Padding::default(),
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.format, self.shape)?;
        if !self.padding.is_zero() {
            write!(f, " pad {}", self.padding)?;
        }
        Ok(())
    }
}

fn one_one() -> [u32; 2] {
    [1, 1]
}

/// Sliding-window parameters shared by convolution and pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub kernel: [u32; 2],
    #[serde(default = "one_one")]
    pub stride: [u32; 2],
    #[serde(default = "one_one")]
    pub dilation: [u32; 2],
    /// Position of the first window relative to the input; negative values
    /// read into the lower padding.
    #[serde(default)]
    pub input_offset: [i32; 2],
}

impl Window {
    pub fn new(kernel: [u32; 2]) -> Self {
        Window {
            kernel,
            stride: [1, 1],
            dilation: [1, 1],
            input_offset: [0, 0],
        }
    }

    pub fn with_stride(mut self, stride: [u32; 2]) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_input_offset(mut self, input_offset: [i32; 2]) -> Self {
        self.input_offset = input_offset;
        self
    }

    fn extent(&self, axis: usize) -> i64 {
        i64::from(self.kernel[axis].saturating_sub(1)) * i64::from(self.dilation[axis]) + 1
    }

    /// Natural output size along `[x, y]` for an input of `input` elements.
    pub fn output_size(&self, input: [u32; 2]) -> [u32; 2] {
        let mut out = [1, 1];
        for axis in 0..2 {
            let pad = (-i64::from(self.input_offset[axis])).max(0);
            let extent = i64::from(input[axis]) + 2 * pad;
            let window = self.extent(axis);
            let stride = i64::from(self.stride[axis].max(1));
            if extent >= window {
                out[axis] = u32::try_from((extent - window) / stride + 1).unwrap_or(u32::MAX);
            }
        }
        out
    }

    /// Padding the input needs so that `output` windows can be read without
    /// leaving the buffer.
    pub fn needed_input_padding(&self, input: [u32; 2], output: [u32; 2]) -> Padding {
        let mut padding = Padding::default();
        for axis in 0..2 {
            let offset = i64::from(self.input_offset[axis]);
            let limit = offset
                + i64::from(output[axis].saturating_sub(1)) * i64::from(self.stride[axis])
                + self.extent(axis);
            padding.lower[axis] = (-offset).max(0) as u32;
            padding.upper[axis] = (limit - i64::from(input[axis])).max(0) as u32;
        }
        padding
    }
}

// ---------------------------------------------------------------------------
// Kind parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunc {
    Relu,
    Sigmoid,
    Tanh,
    Abs,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EltwiseMode {
    Sum,
    Sub,
    Prod,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingMode {
    Max,
    Average,
}

/// One named output of a split along the feature axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitOutput {
    pub name: String,
    pub feature_offset: u32,
}

/// Kind-specific parameters of a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// Network input fed by the user at execution time.
    InputLayout { layout: Layout },
    /// Constant buffer (weights, biases, folded constants).
    Data { layout: Layout },
    /// Inputs: data, weights, optional bias.
    Convolution {
        output_features: u32,
        window: Window,
        #[serde(default)]
        output_size: Option<[u32; 2]>,
    },
    Pooling {
        mode: PoolingMode,
        window: Window,
        #[serde(default)]
        output_size: Option<[u32; 2]>,
    },
    Activation { func: ActivationFunc },
    Eltwise { mode: EltwiseMode },
    FullyConnected { output_features: u32 },
    Softmax,
    Reorder { format: Format },
    Reshape { shape: Shape },
    /// Concatenation along the feature axis.
    Concatenation,
    /// Split along the feature axis; consumers address parts as `id:name`.
    Split { outputs: Vec<SplitOutput> },
    /// Feature-axis window of its input; `features == None` runs to the end.
    Crop {
        feature_offset: u32,
        #[serde(default)]
        features: Option<u32>,
    },
}

/// Fieldless type tag of a [`PrimitiveKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    InputLayout,
    Data,
    Convolution,
    Pooling,
    Activation,
    Eltwise,
    FullyConnected,
    Softmax,
    Reorder,
    Reshape,
    Concatenation,
    Split,
    Crop,
}

impl PrimitiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::InputLayout => "input_layout",
            PrimitiveType::Data => "data",
            PrimitiveType::Convolution => "convolution",
            PrimitiveType::Pooling => "pooling",
            PrimitiveType::Activation => "activation",
            PrimitiveType::Eltwise => "eltwise",
            PrimitiveType::FullyConnected => "fully_connected",
            PrimitiveType::Softmax => "softmax",
            PrimitiveType::Reorder => "reorder",
            PrimitiveType::Reshape => "reshape",
            PrimitiveType::Concatenation => "concatenation",
            PrimitiveType::Split => "split",
            PrimitiveType::Crop => "crop",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PrimitiveKind {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            PrimitiveKind::InputLayout { .. } => PrimitiveType::InputLayout,
            PrimitiveKind::Data { .. } => PrimitiveType::Data,
            PrimitiveKind::Convolution { .. } => PrimitiveType::Convolution,
            PrimitiveKind::Pooling { .. } => PrimitiveType::Pooling,
            PrimitiveKind::Activation { .. } => PrimitiveType::Activation,
            PrimitiveKind::Eltwise { .. } => PrimitiveType::Eltwise,
            PrimitiveKind::FullyConnected { .. } => PrimitiveType::FullyConnected,
            PrimitiveKind::Softmax => PrimitiveType::Softmax,
            PrimitiveKind::Reorder { .. } => PrimitiveType::Reorder,
            PrimitiveKind::Reshape { .. } => PrimitiveType::Reshape,
            PrimitiveKind::Concatenation => PrimitiveType::Concatenation,
            PrimitiveKind::Split { .. } => PrimitiveType::Split,
            PrimitiveKind::Crop { .. } => PrimitiveType::Crop,
        }
    }

    /// Output format given the formats of the inputs. Kinds that don't fix
    /// a format inherit the format of their first input.
    pub fn output_format(&self, inputs: &[Format]) -> Format {
        match self {
            PrimitiveKind::InputLayout { layout } | PrimitiveKind::Data { layout } => {
                layout.format
            }
            PrimitiveKind::Reorder { format } => *format,
            _ => inputs.first().copied().unwrap_or_default(),
        }
    }

    /// Output shape given the shapes of the inputs, in dependency order.
    ///
    /// Returns `None` when a required input shape is missing.
    pub fn output_shape(&self, inputs: &[Shape]) -> Option<Shape> {
        match self {
            PrimitiveKind::InputLayout { layout } | PrimitiveKind::Data { layout } => {
                Some(layout.shape)
            }
            PrimitiveKind::Convolution {
                output_features,
                window,
                output_size,
            } => {
                let input = inputs.first()?;
                let [x, y] = output_size.unwrap_or_else(|| window.output_size(input.spatial()));
                Some(Shape::new(input.batch, *output_features, y, x))
            }
            PrimitiveKind::Pooling {
                window,
                output_size,
                ..
            } => {
                let input = inputs.first()?;
                let [x, y] = output_size.unwrap_or_else(|| window.output_size(input.spatial()));
                Some(Shape::new(input.batch, input.features, y, x))
            }
            PrimitiveKind::FullyConnected { output_features } => {
                let input = inputs.first()?;
                Some(Shape::new(input.batch, *output_features, 1, 1))
            }
            PrimitiveKind::Reshape { shape } => Some(*shape),
            PrimitiveKind::Concatenation => {
                let first = inputs.first()?;
                let features = inputs.iter().map(|s| s.features).sum();
                Some(Shape { features, ..*first })
            }
            PrimitiveKind::Crop {
                feature_offset,
                features,
            } => {
                let input = inputs.first()?;
                let features =
                    features.unwrap_or_else(|| input.features.saturating_sub(*feature_offset));
                Some(Shape { features, ..*input })
            }
            PrimitiveKind::Activation { .. }
            | PrimitiveKind::Eltwise { .. }
            | PrimitiveKind::Softmax
            | PrimitiveKind::Reorder { .. }
            | PrimitiveKind::Split { .. } => inputs.first().copied(),
        }
    }
}

// ---------------------------------------------------------------------------
// Primitive
// ---------------------------------------------------------------------------

/// A primitive descriptor as produced by the topology front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Primitive {
    pub id: PrimitiveId,
    #[serde(flatten)]
    pub kind: PrimitiveKind,
    /// Ids of the primitives this one reads, in input order.
    #[serde(default)]
    pub inputs: Vec<PrimitiveId>,
    /// Padding requested by the user for this primitive's output.
    #[serde(default)]
    pub output_padding: Padding,
}

impl Primitive {
    pub fn new(id: impl Into<PrimitiveId>, kind: PrimitiveKind, inputs: &[&str]) -> Self {
        Primitive {
            id: id.into(),
            kind,
            inputs: inputs.iter().map(|&i| PrimitiveId::from(i)).collect(),
            output_padding: Padding::default(),
        }
    }

    pub fn input_layout(id: impl Into<PrimitiveId>, layout: Layout) -> Self {
        Primitive::new(id, PrimitiveKind::InputLayout { layout }, &[])
    }

    pub fn data(id: impl Into<PrimitiveId>, layout: Layout) -> Self {
        Primitive::new(id, PrimitiveKind::Data { layout }, &[])
    }

    pub fn activation(id: impl Into<PrimitiveId>, input: &str, func: ActivationFunc) -> Self {
        Primitive::new(id, PrimitiveKind::Activation { func }, &[input])
    }

    pub fn reorder(id: impl Into<PrimitiveId>, input: &str, format: Format) -> Self {
        Primitive::new(id, PrimitiveKind::Reorder { format }, &[input])
    }

    pub fn with_output_padding(mut self, padding: Padding) -> Self {
        self.output_padding = padding;
        self
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.kind.primitive_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convolution_output_shape_uses_window() {
        let kind = PrimitiveKind::Convolution {
            output_features: 16,
            window: Window::new([3, 3]).with_input_offset([-1, -1]),
            output_size: None,
        };
        let out = kind.output_shape(&[Shape::new(1, 3, 32, 32)]).unwrap();
        assert_eq!(out, Shape::new(1, 16, 32, 32));
    }

    #[test]
    fn strided_window_output() {
        let window = Window::new([2, 2]).with_stride([2, 2]);
        assert_eq!(window.output_size([8, 6]), [4, 3]);
    }

    #[test]
    fn extreme_input_offset_saturates() {
        let window = Window::new([3, 3]).with_input_offset([i32::MIN, 0]);
        assert_eq!(window.output_size([8, 8]), [u32::MAX, 6]);
    }

    #[test]
    fn explicit_output_size_wins() {
        let kind = PrimitiveKind::Pooling {
            mode: PoolingMode::Max,
            window: Window::new([2, 2]).with_stride([2, 2]),
            output_size: Some([5, 5]),
        };
        let out = kind.output_shape(&[Shape::new(2, 8, 8, 8)]).unwrap();
        assert_eq!(out, Shape::new(2, 8, 5, 5));
    }

    #[test]
    fn needed_padding_for_same_convolution() {
        let window = Window::new([3, 3]).with_input_offset([-1, -1]);
        let padding = window.needed_input_padding([32, 32], [32, 32]);
        assert_eq!(padding, Padding::new([1, 1], [1, 1]));
    }

    #[test]
    fn needed_padding_for_valid_convolution_is_zero() {
        let window = Window::new([3, 3]);
        let padding = window.needed_input_padding([32, 32], [30, 30]);
        assert!(padding.is_zero());
    }

    #[test]
    fn padding_max_is_elementwise() {
        let a = Padding::new([1, 0], [0, 2]);
        let b = Padding::new([0, 3], [1, 1]);
        assert_eq!(Padding::max(a, b), Padding::new([1, 3], [1, 2]));
    }

    #[test]
    fn concatenation_sums_features() {
        let out = PrimitiveKind::Concatenation
            .output_shape(&[Shape::new(1, 4, 2, 2), Shape::new(1, 6, 2, 2)])
            .unwrap();
        assert_eq!(out.features, 10);
    }

    #[test]
    fn reorder_fixes_format_others_inherit() {
        let reorder = PrimitiveKind::Reorder {
            format: Format::Yxfb,
        };
        assert_eq!(reorder.output_format(&[Format::Bfyx]), Format::Yxfb);
        assert_eq!(PrimitiveKind::Softmax.output_format(&[Format::Byxf]), Format::Byxf);
    }

    #[test]
    fn primitive_deserializes_from_tagged_json() {
        let json = r#"{
            "id": "conv1",
            "type": "convolution",
            "output_features": 8,
            "window": { "kernel": [3, 3] },
            "inputs": ["input", "weights"]
        }"#;
        let prim: Primitive = serde_json::from_str(json).unwrap();
        assert_eq!(prim.primitive_type(), PrimitiveType::Convolution);
        assert_eq!(prim.inputs.len(), 2);
        match prim.kind {
            PrimitiveKind::Convolution { window, .. } => assert_eq!(window.stride, [1, 1]),
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
