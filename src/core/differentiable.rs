// Copyright @yucwang 2026

use std::fmt;
use std::sync::Arc;

use crate::core::error::{RenderError, Result};

/// Backward rule: maps the gradient of the output to the gradient of the input.
pub type BackwardFn<Y, X> = Arc<dyn Fn(&Y) -> Result<X> + Send + Sync>;

/// Result of a differentiable operation: the forward value plus an optional
/// pure backward rule. The autodiff driver that chains these lives outside
/// the crate.
pub struct Differentiable<Y, X> {
    output: Y,
    backward: Option<BackwardFn<Y, X>>,
}

impl<Y, X> Differentiable<Y, X> {
    pub fn new<F>(output: Y, backward: F) -> Self
    where
        F: Fn(&Y) -> Result<X> + Send + Sync + 'static,
    {
        Self { output, backward: Some(Arc::new(backward)) }
    }

    /// Forward value without a backward rule.
    pub fn constant(output: Y) -> Self {
        Self { output, backward: None }
    }

    pub fn from_parts(output: Y, backward: Option<BackwardFn<Y, X>>) -> Self {
        Self { output, backward }
    }

    pub fn output(&self) -> &Y {
        &self.output
    }

    pub fn into_output(self) -> Y {
        self.output
    }

    pub fn into_parts(self) -> (Y, Option<BackwardFn<Y, X>>) {
        (self.output, self.backward)
    }

    pub fn has_backward(&self) -> bool {
        self.backward.is_some()
    }

    pub fn backward_fn(&self) -> Option<BackwardFn<Y, X>> {
        self.backward.clone()
    }

    pub fn backward(&self, output_grad: &Y) -> Result<X> {
        match &self.backward {
            Some(rule) => rule(output_grad),
            None => Err(RenderError::MissingGradient("operation created without gradient support")),
        }
    }

    /// Maps the forward value, keeping the backward rule attached to the
    /// original output type.
    pub fn map_output<Z, F, G>(self, forward: F, pullback: G) -> Differentiable<Z, X>
    where
        F: FnOnce(Y) -> Z,
        G: Fn(&Z) -> Result<Y> + Send + Sync + 'static,
        X: 'static,
        Y: 'static,
    {
        let output = forward(self.output);
        let backward = self.backward.map(|inner| -> BackwardFn<Z, X> {
            Arc::new(move |dz: &Z| inner(&pullback(dz)?))
        });
        Differentiable { output, backward }
    }
}

impl<Y: 'static, X: 'static> Differentiable<Y, X> {
    /// Post-processes the input gradient produced by the backward rule.
    pub fn map_input_grad<G>(self, map: G) -> Self
    where
        G: Fn(X) -> Result<X> + Send + Sync + 'static,
    {
        let backward = self.backward.map(|inner| -> BackwardFn<Y, X> {
            Arc::new(move |dy: &Y| map(inner(dy)?))
        });
        Differentiable { output: self.output, backward }
    }

    /// Chains a second operation after this one. The composite has a backward
    /// rule only if both stages have one.
    pub fn then<Z: 'static, F>(self, next: F) -> Result<Differentiable<Z, X>>
    where
        F: FnOnce(Y) -> Result<Differentiable<Z, Y>>,
    {
        let first = self.backward;
        let (output, second) = next(self.output)?.into_parts();
        let backward = match (first, second) {
            (Some(first), Some(second)) => {
                let chained: BackwardFn<Z, X> = Arc::new(move |dz: &Z| first(&second(dz)?));
                Some(chained)
            }
            _ => None,
        };
        Ok(Differentiable { output, backward })
    }
}

impl<Y: Clone, X> Clone for Differentiable<Y, X> {
    fn clone(&self) -> Self {
        Self { output: self.output.clone(), backward: self.backward.clone() }
    }
}

impl<Y: fmt::Debug, X> fmt::Debug for Differentiable<Y, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Differentiable")
            .field("output", &self.output)
            .field("has_backward", &self.has_backward())
            .finish()
    }
}
