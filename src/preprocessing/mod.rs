//! Data preprocessing
//!
//! Fitted, serialisable column transforms used by the datamodule:
//! - Continuous transforms (quantile normal/uniform, Box-Cox, Yeo-Johnson)
//! - Mean imputation and standard scaling
//! - Categorical encoding (ordinal with unknown code, leave-one-out, labels)

mod encoder;
mod scaler;
mod transforms;

pub use encoder::{
    category_strings, LabelEncoder, LeaveOneOutEncoder, OrdinalEncoder, UNKNOWN_CODE,
};
pub use scaler::{Scaler, ScalerType};
pub use transforms::{ContinuousFeatureTransform, ContinuousTransformer};
