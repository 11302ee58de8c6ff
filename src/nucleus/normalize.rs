use crate::matrix::{ExpressionMatrix, row_mean, row_std};

/// Row-wise transform flags.  `center` subtracts the row mean, `scale`
/// divides by the row standard deviation; both together is a z-score.
/// `replace_nan` (on by default) turns any undefined result — division by a
/// zero standard deviation, or an originally missing value — into 0.0.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizationOptions {
    pub center: bool,
    pub scale: bool,
    #[serde(default = "default_replace_nan")]
    pub replace_nan: bool,
}

fn default_replace_nan() -> bool {
    true
}

impl Default for NormalizationOptions {
    fn default() -> NormalizationOptions {
        NormalizationOptions {
            center: false,
            scale: false,
            replace_nan: true,
        }
    }
}

impl NormalizationOptions {
    pub fn identity() -> NormalizationOptions {
        NormalizationOptions::default()
    }

    pub fn z_score() -> NormalizationOptions {
        NormalizationOptions {
            center: true,
            scale: true,
            replace_nan: true,
        }
    }
}

fn center_row(row: &mut [f64]) {
    let mean = row_mean(row);
    for value in row.iter_mut() {
        *value -= mean;
    }
}

fn scale_row(row: &mut [f64]) {
    let std = row_std(row);
    for value in row.iter_mut() {
        *value /= std;
    }
}

/// Apply the selected per-gene transform to every row of the matrix.  With
/// both flags off this is the identity transform (apart from NaN
/// replacement when enabled).
pub fn normalize(matrix: &mut ExpressionMatrix, options: &NormalizationOptions) {
    for row in matrix.rows_mut() {
        if options.center && options.scale {
            // scale uses the std of the centered row, which equals the std
            // of the original row
            center_row(row);
            scale_row(row);
        } else if options.center {
            center_row(row);
        } else if options.scale {
            scale_row(row);
        }

        if options.replace_nan {
            for value in row.iter_mut() {
                if !value.is_finite() {
                    *value = 0.0;
                }
            }
        }
    }
}
