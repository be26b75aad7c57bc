use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig,
};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
};
use burn::prelude::*;
use burn::tensor::activation;

/// The two activation configurations compared by the experiment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActivationKind {
    #[default]
    Relu,
    Selu,
}

impl ActivationKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActivationKind::Relu => "ReLU",
            ActivationKind::Selu => "SELU",
        }
    }
}

impl core::fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// Allow `ActivationKind` to sit inside a `#[derive(Module)]` struct as a
// constant (parameter-free) field.
use burn::constant;
constant!(ActivationKind);

/// Variant order used everywhere: the stock network first.
pub const VARIANTS: [ActivationKind; 2] = [ActivationKind::Relu, ActivationKind::Selu];

const SELU_SCALE: f64 = 1.050_700_987_355_480_5;
const SELU_ALPHA: f64 = 1.673_263_242_354_377_2;

/// Applies the Scaled Exponential Linear Unit function element-wise, with the
/// self-normalizing constants from Klambauer et al., 2017.
pub fn selu<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    let positive = input.clone().clamp_min(0.0);
    let negative = (input.clamp_max(0.0).exp() - 1.0).mul_scalar(SELU_ALPHA);
    (positive + negative).mul_scalar(SELU_SCALE)
}

/// One activation site in the network.
///
/// The site is a parameter-free module holding only its kind, so variant
/// construction can rewrite sites without touching the surrounding topology
/// or any recorded state.
#[derive(Module, Clone, Debug, Default)]
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self.kind {
            ActivationKind::Relu => activation::relu(input),
            ActivationKind::Selu => selu(input),
        }
    }
}

/// Configuration of the VGG11 topology with batch normalization.
#[derive(Config, Debug)]
pub struct VggConfig {
    /// Number of classifier outputs. The stock head is 1000-way and is kept
    /// for every dataset.
    #[config(default = 1000)]
    pub num_classes: usize,
    /// Channel width of the first convolution stage; the stock network uses 64.
    #[config(default = 64)]
    pub base_width: usize,
    /// Width of the two hidden classifier layers.
    #[config(default = 4096)]
    pub hidden_size: usize,
    /// Dropout rate applied after each hidden classifier layer.
    #[config(default = 0.5)]
    pub dropout: f64,
}

/// Channel multiplier and trailing max-pool for each convolution stage.
const STAGE_PLAN: [(usize, bool); 8] = [
    (1, true),
    (2, true),
    (4, false),
    (4, true),
    (8, false),
    (8, true),
    (8, false),
    (8, true),
];

const POOLED_SIDE: usize = 7;

/// One convolution stage: 3x3 conv, batch norm, activation, optional 2x2
/// max-pool.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Activation,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, pool: bool, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            activation: Activation::new(ActivationKind::Relu),
            pool: pool.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init()),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// One classifier stage: linear layer, plus activation and dropout on the
/// hidden stages.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    activation: Option<Activation>,
    dropout: Option<Dropout>,
}

impl<B: Backend> DenseBlock<B> {
    fn new(d_input: usize, d_output: usize, hidden: bool, dropout: f64, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(d_input, d_output).init(device),
            activation: hidden.then(|| Activation::new(ActivationKind::Relu)),
            dropout: hidden.then(|| DropoutConfig::new(dropout).init()),
        }
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = self.linear.forward(input);
        if let Some(activation) = &self.activation {
            x = activation.forward(x);
        }
        if let Some(dropout) = &self.dropout {
            x = dropout.forward(x);
        }
        x
    }
}

/// VGG11 with batch normalization, stored as a tree of named sub-modules so
/// activation sites can be rewritten structurally.
#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    features: Vec<ConvBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    classifier: Vec<DenseBlock<B>>,
}

impl VggConfig {
    /// Initializes the stock network: every activation site is ReLU.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg<B> {
        let mut features = Vec::with_capacity(STAGE_PLAN.len());
        let mut in_channels = 3;
        for (factor, pool) in STAGE_PLAN {
            let out_channels = factor * self.base_width;
            features.push(ConvBlock::new(in_channels, out_channels, pool, device));
            in_channels = out_channels;
        }

        let pooled = in_channels * POOLED_SIDE * POOLED_SIDE;
        let classifier = vec![
            DenseBlock::new(pooled, self.hidden_size, true, self.dropout, device),
            DenseBlock::new(self.hidden_size, self.hidden_size, true, self.dropout, device),
            DenseBlock::new(self.hidden_size, self.num_classes, false, self.dropout, device),
        ];

        Vgg {
            features,
            avgpool: AdaptiveAvgPool2dConfig::new([POOLED_SIDE, POOLED_SIDE]).init(),
            classifier,
        }
    }

    /// Initializes a freshly-seeded instance of the requested variant.
    pub fn init_variant<B: Backend>(&self, variant: ActivationKind, device: &B::Device) -> Vgg<B> {
        let model = self.init(device);
        match variant {
            ActivationKind::Relu => model,
            ActivationKind::Selu => {
                replace_activations(model, ActivationKind::Relu, ActivationKind::Selu).0
            }
        }
    }
}

impl<B: Backend> Vgg<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = input;
        for block in &self.features {
            x = block.forward(x);
        }
        let x = self.avgpool.forward(x);
        let mut x = x.flatten::<2>(1, 3);
        for block in &self.classifier {
            x = block.forward(x);
        }
        x
    }

    /// Counts activation sites of `kind` by traversing the full module tree.
    pub fn count_activations(&self, kind: ActivationKind) -> usize {
        let features = self
            .features
            .iter()
            .filter(|block| block.activation.kind() == kind)
            .count();
        let classifier = self
            .classifier
            .iter()
            .filter_map(|block| block.activation.as_ref())
            .filter(|activation| activation.kind() == kind)
            .count();
        features + classifier
    }
}

/// Depth-first rewrite of every activation site matching `target`.
///
/// Returns the rebuilt tree and the number of sites replaced; a tree with no
/// matching sites comes back structurally unchanged with a count of zero.
pub fn replace_activations<B: Backend>(
    model: Vgg<B>,
    target: ActivationKind,
    replacement: ActivationKind,
) -> (Vgg<B>, usize) {
    let mut replaced = 0;
    let Vgg {
        features,
        avgpool,
        classifier,
    } = model;

    let features = features
        .into_iter()
        .map(|mut block| {
            block.activation = rewrite(block.activation, target, replacement, &mut replaced);
            block
        })
        .collect();
    let classifier = classifier
        .into_iter()
        .map(|mut block| {
            block.activation = block
                .activation
                .map(|node| rewrite(node, target, replacement, &mut replaced));
            block
        })
        .collect();

    (
        Vgg {
            features,
            avgpool,
            classifier,
        },
        replaced,
    )
}

fn rewrite(
    node: Activation,
    target: ActivationKind,
    replacement: ActivationKind,
    replaced: &mut usize,
) -> Activation {
    if node.kind() == target {
        *replaced += 1;
        Activation::new(replacement)
    } else {
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::Module;

    type TestBackend = NdArray;

    /// Ten activation sites: eight convolution stages plus two hidden
    /// classifier stages.
    const ACTIVATION_SITES: usize = 10;

    fn tiny_config() -> VggConfig {
        VggConfig::new()
            .with_num_classes(4)
            .with_base_width(1)
            .with_hidden_size(8)
    }

    #[test]
    fn selu_matches_its_defining_identities() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_floats([-20.0, -1.0, 0.0, 1.0, 2.0], &device);
        let output: Vec<f32> = selu(input).into_data().to_vec().unwrap();

        let scale = SELU_SCALE as f32;
        let alpha = SELU_ALPHA as f32;
        let expected = [
            -scale * alpha * (1.0 - (-20.0f32).exp()),
            -scale * alpha * (1.0 - (-1.0f32).exp()),
            0.0,
            scale,
            2.0 * scale,
        ];
        for (value, expected) in output.iter().zip(expected) {
            assert!((value - expected).abs() < 1e-4, "{value} != {expected}");
        }
    }

    #[test]
    fn stock_network_is_all_relu() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        assert_eq!(model.count_activations(ActivationKind::Relu), ACTIVATION_SITES);
        assert_eq!(model.count_activations(ActivationKind::Selu), 0);
    }

    #[test]
    fn swap_replaces_every_matching_site() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        let (model, replaced) =
            replace_activations(model, ActivationKind::Relu, ActivationKind::Selu);

        assert_eq!(replaced, ACTIVATION_SITES);
        assert_eq!(model.count_activations(ActivationKind::Selu), ACTIVATION_SITES);
        assert_eq!(model.count_activations(ActivationKind::Relu), 0);
    }

    #[test]
    fn swap_without_matches_is_a_no_op() {
        let device = Default::default();
        let model = tiny_config().init_variant::<TestBackend>(ActivationKind::Selu, &device);
        let (model, replaced) =
            replace_activations(model, ActivationKind::Relu, ActivationKind::Selu);

        assert_eq!(replaced, 0);
        assert_eq!(model.count_activations(ActivationKind::Selu), ACTIVATION_SITES);
    }

    #[test]
    fn variants_share_the_same_parameter_count() {
        let device = Default::default();
        let relu = tiny_config().init_variant::<TestBackend>(ActivationKind::Relu, &device);
        let selu = tiny_config().init_variant::<TestBackend>(ActivationKind::Selu, &device);
        assert_eq!(relu.num_params(), selu.num_params());
    }

    #[test]
    fn forward_produces_one_logit_row_per_example() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [2, 4]);
    }
}
