use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use embedding::token::{TokenEmbedding, TokenEmbeddingConfig};

fn make_ids(data: &[i64], shape: (usize, usize)) -> Result<Tensor> {
    Tensor::from_slice(data, shape, &Device::Cpu)
}

fn table(varmap: &VarMap, vocab_size: usize, hidden_dim: usize) -> Result<TokenEmbedding> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
    TokenEmbedding::new(
        TokenEmbeddingConfig {
            vocab_size,
            hidden_dim,
        },
        vb.pp("word_embeddings"),
    )
}

#[test]
fn forward_shape_matches_config() -> Result<()> {
    let varmap = VarMap::new();
    let embedding = table(&varmap, 8, 4)?;
    let token_ids = make_ids(&[0, 1, 2, 3], (2, 2))?;

    let output = embedding.forward(&token_ids)?;

    assert_eq!(output.dims(), &[2, 2, 4]);
    assert_eq!(output.dtype(), DType::F32);
    Ok(())
}

#[test]
fn forward_rejects_out_of_range_ids() -> Result<()> {
    let varmap = VarMap::new();
    let embedding = table(&varmap, 4, 3)?;
    let token_ids = make_ids(&[0, 4], (1, 2))?;

    let err = embedding.forward(&token_ids).unwrap_err();
    assert!(err.to_string().contains("token id 4 exceeds vocab size"));
    Ok(())
}

#[test]
fn forward_rejects_float_ids() -> Result<()> {
    let varmap = VarMap::new();
    let embedding = table(&varmap, 4, 3)?;
    let token_ids = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
    assert!(embedding.forward(&token_ids).is_err());
    Ok(())
}

#[test]
fn rows_come_from_registered_weight() -> Result<()> {
    let varmap = VarMap::new();
    let embedding = table(&varmap, 5, 3)?;
    let weight = {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        data["word_embeddings.weight"].as_tensor().clone()
    };

    let ids = Tensor::new(&[[2u32, 4]], &Device::Cpu)?;
    let rows = embedding.forward(&ids)?.squeeze(0)?;
    let expected = weight.index_select(&Tensor::new(&[2u32, 4], &Device::Cpu)?, 0)?;
    let diff = (rows - expected)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert_eq!(diff, 0.0);
    Ok(())
}
