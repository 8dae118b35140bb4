use super::GenerationParams;
use candle_core::{DType, Error, Result, Tensor, D};
use rand::{distr::Distribution, SeedableRng};

#[derive(Clone, PartialEq, Debug)]
pub enum Sampling {
    ArgMax,
    All { temperature: f64 },
    TopK { k: usize, temperature: f64 },
    TopP { p: f64, temperature: f64 },
    TopKThenTopP { k: usize, p: f64, temperature: f64 },
}

/// Turns a logits vector into the next token id.
pub struct LogitsProcessor {
    rng: rand::rngs::StdRng,
    sampling: Sampling,
}

impl LogitsProcessor {
    pub fn from_sampling(seed: u64, sampling: Sampling) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
            sampling,
        }
    }

    fn sample_argmax(&self, logits: &Tensor) -> Result<u32> {
        logits.argmax(D::Minus1)?.to_scalar::<u32>()
    }

    fn sample_multinomial(&mut self, prs: &[f32]) -> Result<u32> {
        let distr = rand::distr::weighted::WeightedIndex::new(prs).map_err(Error::wrap)?;
        Ok(distr.sample(&mut self.rng) as u32)
    }

    /// Nucleus sampling: zero out the tail once the cumulative mass reaches `top_p`.
    fn sample_topp(&mut self, prs: &mut [f32], top_p: f32) -> Result<u32> {
        let mut argsort_indices = (0..prs.len()).collect::<Vec<_>>();
        argsort_indices.sort_by(|&i, &j| prs[j].total_cmp(&prs[i]));

        let mut cumsum = 0.;
        for index in &argsort_indices {
            if cumsum >= top_p {
                prs[*index] = 0.0;
            } else {
                cumsum += prs[*index];
            }
        }
        self.sample_multinomial(prs)
    }

    fn sample_topk(&mut self, prs: &mut [f32], top_k: usize) -> Result<u32> {
        if top_k >= prs.len() {
            return self.sample_multinomial(prs);
        }
        let mut argsort_indices = (0..prs.len()).collect::<Vec<_>>();
        let (indices, _, _) =
            argsort_indices.select_nth_unstable_by(top_k, |&i, &j| prs[j].total_cmp(&prs[i]));
        let top_prs = indices.iter().map(|&i| prs[i]).collect::<Vec<_>>();
        let index = self.sample_multinomial(&top_prs)?;
        Ok(indices[index as usize] as u32)
    }

    fn sample_topk_topp(&mut self, prs: &mut [f32], top_k: usize, top_p: f32) -> Result<u32> {
        if top_k >= prs.len() {
            return self.sample_topp(prs, top_p);
        }
        let mut argsort_indices = (0..prs.len()).collect::<Vec<_>>();
        let (indices, _, _) =
            argsort_indices.select_nth_unstable_by(top_k, |&i, &j| prs[j].total_cmp(&prs[i]));
        let mut top_prs = indices.iter().map(|&i| prs[i]).collect::<Vec<_>>();
        let sum: f32 = top_prs.iter().sum();
        if sum > 0. {
            top_prs.iter_mut().for_each(|p| *p /= sum);
        }
        let index = self.sample_topp(&mut top_prs, top_p)?;
        Ok(indices[index as usize] as u32)
    }

    /// Sample from a 1-D logits tensor of vocabulary size.
    pub fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        let logits = logits.to_dtype(DType::F32)?;
        let probabilities = |temperature: f64| -> Result<Vec<f32>> {
            let logits = (&logits / temperature)?;
            candle_nn::ops::softmax_last_dim(&logits)?.to_vec1()
        };

        match self.sampling.clone() {
            Sampling::ArgMax => self.sample_argmax(&logits),
            Sampling::All { temperature } => {
                let prs = probabilities(temperature)?;
                self.sample_multinomial(&prs)
            }
            Sampling::TopK { k, temperature } => {
                let mut prs = probabilities(temperature)?;
                self.sample_topk(&mut prs, k)
            }
            Sampling::TopP { p, temperature } => {
                let mut prs = probabilities(temperature)?;
                self.sample_topp(&mut prs, p as f32)
            }
            Sampling::TopKThenTopP { k, p, temperature } => {
                let mut prs = probabilities(temperature)?;
                self.sample_topk_topp(&mut prs, k, p as f32)
            }
        }
    }
}

/// Pick the sampling strategy implied by `params`.
pub fn initialize_logits_processor(params: &GenerationParams) -> LogitsProcessor {
    let temperature = params.temperature;
    let top_p_enabled = params.top_p > 0.0 && params.top_p < 1.0;

    let sampling = if temperature <= 0. {
        Sampling::ArgMax
    } else {
        match (params.top_k, top_p_enabled) {
            (0, false) => Sampling::All { temperature },
            (0, true) => Sampling::TopP {
                p: params.top_p,
                temperature,
            },
            (k, false) => Sampling::TopK { k, temperature },
            (k, true) => Sampling::TopKThenTopP {
                k,
                p: params.top_p,
                temperature,
            },
        }
    };
    LogitsProcessor::from_sampling(params.seed, sampling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn logits() -> Tensor {
        Tensor::new(&[0.1f32, 3.0, 0.2, 2.9, -1.0], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_argmax() -> Result<()> {
        let mut processor = LogitsProcessor::from_sampling(0, Sampling::ArgMax);
        assert_eq!(processor.sample(&logits())?, 1);
        Ok(())
    }

    #[test]
    fn test_top_k_one_is_greedy() -> Result<()> {
        let mut processor = LogitsProcessor::from_sampling(
            7,
            Sampling::TopK {
                k: 1,
                temperature: 1.0,
            },
        );
        for _ in 0..10 {
            assert_eq!(processor.sample(&logits())?, 1);
        }
        Ok(())
    }

    #[test]
    fn test_top_k_stays_within_k() -> Result<()> {
        let mut processor = LogitsProcessor::from_sampling(
            3,
            Sampling::TopK {
                k: 2,
                temperature: 1.0,
            },
        );
        for _ in 0..50 {
            let token = processor.sample(&logits())?;
            assert!(token == 1 || token == 3, "sampled {token}");
        }
        Ok(())
    }

    #[test]
    fn test_tiny_top_p_is_greedy() -> Result<()> {
        let mut processor = LogitsProcessor::from_sampling(
            11,
            Sampling::TopP {
                p: 0.01,
                temperature: 1.0,
            },
        );
        for _ in 0..10 {
            assert_eq!(processor.sample(&logits())?, 1);
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_same_tokens() -> Result<()> {
        let sampling = Sampling::All { temperature: 2.0 };
        let mut a = LogitsProcessor::from_sampling(42, sampling.clone());
        let mut b = LogitsProcessor::from_sampling(42, sampling);
        for _ in 0..20 {
            assert_eq!(a.sample(&logits())?, b.sample(&logits())?);
        }
        Ok(())
    }

    #[test]
    fn test_strategy_selection() {
        let greedy = GenerationParams {
            temperature: 0.0,
            top_k: 50,
            ..Default::default()
        };
        assert_eq!(initialize_logits_processor(&greedy).sampling, Sampling::ArgMax);

        let nucleus = GenerationParams {
            temperature: 0.6,
            top_p: 0.9,
            ..Default::default()
        };
        assert_eq!(
            initialize_logits_processor(&nucleus).sampling,
            Sampling::TopP {
                p: 0.9,
                temperature: 0.6
            }
        );
    }
}
