//! Lightweight validation helpers shared across layer components.
//!
//! These routines return `candle_core::Result<()>` so call sites can
//! propagate errors without panicking.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Validates a `(batch, seq)` integer id or mask tensor.
pub fn expect_batch_seq(context: &str, tensor: &Tensor) -> Result<(usize, usize)> {
    match tensor.dims() {
        [batch, seq] => Ok((*batch, *seq)),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq) layout, got {dims:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn reports_context_on_mismatch() -> Result<()> {
        let t = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu)?;
        expect_batch_seq_hidden("ok", &t, 4)?;
        let err = expect_batch_seq_hidden("head.input", &t, 5).unwrap_err();
        assert!(err.to_string().contains("head.input"));
        assert!(expect_batch_seq("ids", &t).is_err());
        Ok(())
    }
}
