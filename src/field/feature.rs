//! Positional features of query points.

pub use super::*;

/// Which coordinates of a point feed the network.
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum PositionInput {
    /// Only the depth `-z` in the view's camera frame.
    Depth,
    /// The full `xyz` in the view's camera frame.
    Xyz,
}

/// How viewing directions feed the network.
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum ViewDirections {
    Off,
    /// Positionally encoded together with the point.
    Encoded,
    /// Appended after the encoded point.
    Raw,
}

/// The positional feature strategy, fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionalFeatures {
    pub code: Option<PositionalEncoding>,
    pub input: PositionInput,
    /// Use the rotated point without the view translation.
    pub normalize_z: bool,
    pub view_directions: ViewDirections,
}

impl PositionalFeatures {
    pub fn new(
        input: PositionInput,
        normalize_z: bool,
        view_directions: ViewDirections,
        code: Option<&PositionalEncodingConfig>,
    ) -> Self {
        let dim_code = dim_code(input, view_directions);

        Self {
            code: code.map(|config| config.init(dim_code)),
            input,
            normalize_z,
            view_directions,
        }
    }

    /// Output dimension.
    pub fn dim(&self) -> usize {
        let dim_encoded = self.code.as_ref().map_or(
            dim_code(self.input, self.view_directions),
            PositionalEncoding::dim_output,
        );

        match self.view_directions {
            ViewDirections::Raw => dim_encoded + 3,
            _ => dim_encoded,
        }
    }

    /// Whether [`Self::forward`] needs viewing directions.
    #[inline]
    pub fn needs_directions(&self) -> bool {
        self.view_directions != ViewDirections::Off
    }

    /// ## Shapes
    ///
    /// * `points_rotated` - `[M, 3]`, rotated into the camera frame
    /// * `points_camera` - `[M, 3]`, rotated and translated
    /// * `directions` - `[M, 3]`, rotated into the camera frame
    /// * `output` - `[M, dim]`
    pub fn forward<B: Backend>(
        &self,
        points_rotated: Tensor<B, 2>,
        points_camera: Tensor<B, 2>,
        directions: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 2>, Error> {
        let points = if self.normalize_z {
            points_rotated
        } else {
            points_camera
        };
        let count = points.dims()[0];
        let mut features = match self.input {
            PositionInput::Depth => points.slice([0..count, 2..3]).neg(),
            PositionInput::Xyz => points,
        };

        let directions = match (self.view_directions, directions) {
            (ViewDirections::Off, _) => None,
            (_, Some(directions)) => Some(directions),
            (_, None) => {
                return Err(Error::Validation(
                    "the view directions".into(),
                    "given".into(),
                ))
            },
        };

        if let (ViewDirections::Encoded, Some(directions)) =
            (self.view_directions, directions.to_owned())
        {
            features = Tensor::cat(vec![features, directions], 1);
        }
        if let Some(code) = &self.code {
            features = code.forward(features);
        }
        if let (ViewDirections::Raw, Some(directions)) = (self.view_directions, directions) {
            features = Tensor::cat(vec![features, directions], 1);
        }

        Ok(features)
    }
}

/// The input dimension of the positional encoding.
fn dim_code(
    input: PositionInput,
    view_directions: ViewDirections,
) -> usize {
    let dim_point = match input {
        PositionInput::Depth => 1,
        PositionInput::Xyz => 3,
    };
    match view_directions {
        ViewDirections::Encoded => dim_point + 3,
        _ => dim_point,
    }
}
