//! Translator: the user's pre/post-processing around a cached graph

use crate::context::StageContext;
use crate::error::TranslateResult;
use crate::list::TensorList;

/// Converts application values to graph tensors and back
///
/// `process_input` builds the tensor list the graph binds by name, allocating
/// through [`StageContext::arena`]. `process_output` receives the graph's
/// outputs in declared order, already readable. Either stage may fail with
/// any error; the predictor reports it as [`Error::Conversion`](crate::Error::Conversion)
/// with the failure as its source.
///
/// ```rust
/// use infera_core::{StageContext, TensorList, TranslateResult, Translator};
///
/// struct Increment;
///
/// impl Translator for Increment {
///     type Input = i64;
///     type Output = i64;
///
///     fn process_input(&self, ctx: &StageContext<'_>, input: i64) -> TranslateResult<TensorList> {
///         let tensor = ctx.arena().create_tensor(vec![1], &[input])?;
///         Ok(TensorList::new().with("x", tensor))
///     }
///
///     fn process_output(&self, _ctx: &StageContext<'_>, outputs: TensorList) -> TranslateResult<i64> {
///         let value = outputs.require("y")?.to_vec::<i64>()?;
///         Ok(value[0] + 1)
///     }
/// }
/// ```
pub trait Translator {
    /// Application-level input
    type Input;
    /// Application-level output
    type Output;

    fn process_input(&self, ctx: &StageContext<'_>, input: Self::Input) -> TranslateResult<TensorList>;

    fn process_output(&self, ctx: &StageContext<'_>, outputs: TensorList) -> TranslateResult<Self::Output>;
}
