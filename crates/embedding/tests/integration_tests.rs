use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use embedding::{BertEmbeddings, BertEmbeddingsConfig};

fn config() -> BertEmbeddingsConfig {
    BertEmbeddingsConfig {
        vocab_size: 16,
        hidden_size: 8,
        max_position_embeddings: 6,
        type_vocab_size: 2,
        layer_norm_eps: 1e-12,
        dropout_p: 0.1,
    }
}

#[test]
fn registers_hugging_face_names() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BertEmbeddings::new(&config(), vb.pp("embeddings"))?;

    let data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
    for name in [
        "embeddings.word_embeddings.weight",
        "embeddings.position_embeddings.weight",
        "embeddings.token_type_embeddings.weight",
        "embeddings.LayerNorm.weight",
        "embeddings.LayerNorm.bias",
    ] {
        assert!(data.contains_key(name), "missing {name}");
    }
    Ok(())
}

#[test]
fn output_is_normalised_per_position() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let embeddings = BertEmbeddings::new(&config(), vb)?;

    let ids = Tensor::new(&[[1u32, 5, 9, 0]], &Device::Cpu)?;
    let out = embeddings.forward(&ids, None, false)?;
    assert_eq!(out.dims(), &[1, 4, 8]);

    let means = out.mean_keepdim(2)?.flatten_all()?.to_vec1::<f32>()?;
    assert!(means.iter().all(|m| m.abs() < 1e-4));
    Ok(())
}

#[test]
fn rejects_sequences_beyond_position_table() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let embeddings = BertEmbeddings::new(&config(), vb)?;

    let ids = Tensor::zeros((1, 7), DType::U32, &Device::Cpu)?;
    assert!(embeddings.forward(&ids, None, false).is_err());
    Ok(())
}
