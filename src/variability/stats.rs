//! Statistics of a model mode pattern against the observed one.

use crate::errors::{PmpError, Result};
use crate::field::Field;
use crate::regions::{region_subset, RegionSpec};
use crate::statistics::{bias_xy, cor_xy, mean_xy, nan_std, rms_xy, rmsc_xy};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Sample standard deviation (N - 1) of a PC series
pub fn calc_std(series: &[f64]) -> f64 {
    nan_std(series, 1)
}

/// How the model pattern was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeMethod {
    /// The model's own EOF
    Eof,
    /// Common basis function: projection onto the observed EOF
    Cbf,
}

impl ModeMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eof => "eof",
            Self::Cbf => "cbf",
        }
    }
}

/// A mode as compared in the metrics: pattern over the mode domain, its
/// global regression map and PC.
#[derive(Debug, Clone)]
pub struct ModePattern {
    pub eof: Field,
    pub eof_lr: Field,
    pub pc: Vec<f64>,
    pub stdv_pc: f64,
    pub frac: f64,
}

impl ModePattern {
    fn flip_sign(&mut self) {
        self.eof.data.mapv_inplace(|v| -v);
        self.eof_lr.data.mapv_inplace(|v| -v);
        self.pc.iter_mut().for_each(|v| *v = -*v);
    }
}

/// The observed mode a model is scored against.
#[derive(Debug, Clone, Copy)]
pub struct ObsPattern<'a> {
    pub eof: &'a Field,
    pub eof_lr: &'a Field,
    pub stdv_pc: f64,
}

fn same_grid(context: &str, a: &Field, b: &Field) -> Result<()> {
    if a.grid.shape() != b.grid.shape() {
        let (l, r) = (a.grid.shape(), b.grid.shape());
        return Err(PmpError::ShapeMismatch {
            context: context.to_string(),
            left: vec![l.0, l.1],
            right: vec![r.0, r.1],
        });
    }
    Ok(())
}

/// `frac`, `stdv_pc`, `mean`, `mean_glo` and, against observations, `cor`,
/// `rms`, `rmsc`, `bias` (each also `_glo`) and `stdv_pc_ratio_to_obs`.
///
/// For [`ModeMethod::Eof`] a negative pattern correlation flips the sign of
/// the model pattern and PC before the remaining statistics are computed.
pub fn calc_stats_save_dict(
    pattern: &mut ModePattern,
    domain: &RegionSpec,
    obs: Option<ObsPattern<'_>>,
    method: ModeMethod,
) -> Result<Map<String, Value>> {
    let mut dict = Map::new();
    dict.insert("frac".into(), json!(pattern.frac));
    dict.insert("stdv_pc".into(), json!(pattern.stdv_pc));

    let w = pattern.eof.grid.area_weights();
    let w_glo = pattern.eof_lr.grid.area_weights();
    dict.insert("mean".into(), json!(mean_xy(pattern.eof.map(0), w.view())?));
    dict.insert("mean_glo".into(), json!(mean_xy(pattern.eof_lr.map(0), w_glo.view())?));

    let Some(obs) = obs else {
        return Ok(dict);
    };

    same_grid("model vs reference global pattern", &pattern.eof_lr, obs.eof_lr)?;
    let mut model_dom = region_subset(&pattern.eof_lr, domain)?;
    same_grid("model vs reference mode domain", &model_dom, obs.eof)?;
    let w = model_dom.grid.area_weights();

    let mut cor = cor_xy(model_dom.map(0), obs.eof.map(0), w.view())?;
    let mut cor_glo = cor_xy(pattern.eof_lr.map(0), obs.eof_lr.map(0), w_glo.view())?;

    if method == ModeMethod::Eof && cor < 0.0 {
        debug!(cor, "negative pattern correlation, flipping model sign");
        pattern.flip_sign();
        model_dom.data.mapv_inplace(|v| -v);
        cor = cor_xy(model_dom.map(0), obs.eof.map(0), w.view())?;
        cor_glo = cor_xy(pattern.eof_lr.map(0), obs.eof_lr.map(0), w_glo.view())?;
    }

    let (dm, d_o) = (model_dom.map(0), obs.eof.map(0));
    let (gm, g_o) = (pattern.eof_lr.map(0), obs.eof_lr.map(0));
    dict.insert("rms".into(), json!(rms_xy(dm, d_o, w.view())?));
    dict.insert("rms_glo".into(), json!(rms_xy(gm, g_o, w_glo.view())?));
    dict.insert("rmsc".into(), json!(rmsc_xy(dm, d_o, w.view(), false)?));
    dict.insert("rmsc_glo".into(), json!(rmsc_xy(gm, g_o, w_glo.view(), false)?));
    dict.insert("cor".into(), json!(cor));
    dict.insert("cor_glo".into(), json!(cor_glo));
    dict.insert("bias".into(), json!(bias_xy(dm, d_o, w.view())?));
    dict.insert("bias_glo".into(), json!(bias_xy(gm, g_o, w_glo.view())?));
    dict.insert("stdv_pc_ratio_to_obs".into(), json!(pattern.stdv_pc / obs.stdv_pc));
    Ok(dict)
}
