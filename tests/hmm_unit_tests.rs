extern crate kelpie_genome;

use approx::assert_relative_eq;
use ndarray::Array2;

use kelpie_genome::imputation::li_stephens::{HmmParams, HmmScratch, LiStephensHmm};
use kelpie_genome::model::marker::{Marker, Markers};

fn biallelic_markers(n: usize) -> Markers {
    let markers = (0..n)
        .map(|m| {
            Marker::new(
                0,
                1000 + m as u32,
                None,
                vec!["A".to_string(), "C".to_string()],
            )
            .unwrap()
        })
        .collect();
    Markers::new(markers).unwrap()
}

fn al_offsets(markers: &Markers) -> Vec<usize> {
    let mut offsets = vec![0usize];
    let mut total = 0;
    for m in markers.iter() {
        total += m.n_alleles();
        offsets.push(total);
    }
    offsets
}

fn fill_states(states: &mut Array2<u16>, columns: &[Vec<u16>]) {
    for (j, column) in columns.iter().enumerate() {
        for (m, &a) in column.iter().enumerate() {
            states[[m, j]] = a;
        }
    }
}

#[test]
fn posteriors_sum_to_one_per_marker() {
    let n_markers = 7;
    let markers = biallelic_markers(n_markers);
    let gen_pos: Vec<f64> = (0..n_markers).map(|m| 0.05 * m as f64).collect();
    let hmm = LiStephensHmm::new(&markers, &gen_pos, HmmParams { rho: 0.04, err: 1e-3 });
    let offsets = al_offsets(&markers);
    let mut scratch = HmmScratch::new(n_markers, 3, *offsets.last().unwrap());
    fill_states(
        &mut scratch.state_alleles,
        &[
            vec![0, 0, 1, 1, 0, 1, 0],
            vec![1, 0, 0, 1, 1, 0, 0],
            vec![0, 1, 1, 0, 1, 1, 1],
        ],
    );
    let obs = vec![0, -1, 1, 1, -1, 0, 0];
    hmm.switch_probs(3, &mut scratch.p_switch);
    hmm.forward(&obs, &scratch.state_alleles, 3, &scratch.p_switch, &mut scratch.fwd);
    hmm.backward(&obs, &scratch.state_alleles, 3, &scratch.p_switch, &mut scratch.bwd);
    hmm.posteriors(
        &scratch.fwd,
        &scratch.bwd,
        &scratch.state_alleles,
        3,
        &offsets,
        &mut scratch.al_probs1,
    );
    for m in 0..n_markers {
        let sum: f64 = scratch.al_probs1[offsets[m]..offsets[m + 1]].iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn forward_log_likelihood_matches_unscaled_recursion() {
    let n_markers = 4;
    let k = 2;
    let markers = biallelic_markers(n_markers);
    let gen_pos = vec![0.0, 0.02, 0.1, 0.12];
    let params = HmmParams { rho: 0.04, err: 1e-2 };
    let hmm = LiStephensHmm::new(&markers, &gen_pos, params);
    let offsets = al_offsets(&markers);
    let columns = vec![vec![0u16, 1, 0, 1], vec![1u16, 0, 0, 0]];
    let obs = vec![0, 1, 0, -1];
    let mut scratch = HmmScratch::new(n_markers, k, *offsets.last().unwrap());
    fill_states(&mut scratch.state_alleles, &columns);
    hmm.switch_probs(k, &mut scratch.p_switch);
    let log_lk = hmm.forward(
        &obs,
        &scratch.state_alleles,
        k,
        &scratch.p_switch,
        &mut scratch.fwd,
    );

    // brute-force unnormalized forward recursion
    let emission = |m: usize, j: usize| -> f64 {
        if obs[m] < 0 {
            1.0
        } else if columns[j][m] as i32 == obs[m] {
            1.0 - params.err
        } else {
            params.err
        }
    };
    let mut alpha: Vec<f64> = (0..k).map(|j| emission(0, j) / k as f64).collect();
    for m in 1..n_markers {
        let p = scratch.p_switch[m - 1];
        let total: f64 = alpha.iter().sum();
        alpha = (0..k)
            .map(|j| ((1.0 - p) * alpha[j] + p * total / k as f64) * emission(m, j))
            .collect();
    }
    let brute: f64 = alpha.iter().sum::<f64>();
    assert_relative_eq!(log_lk, brute.ln(), epsilon = 1e-9);
}

#[test]
fn single_state_posterior_is_a_point_mass() {
    let n_markers = 3;
    let markers = biallelic_markers(n_markers);
    let gen_pos = vec![0.0, 0.1, 0.2];
    let hmm = LiStephensHmm::new(&markers, &gen_pos, HmmParams { rho: 0.04, err: 1e-4 });
    let offsets = al_offsets(&markers);
    let mut scratch = HmmScratch::new(n_markers, 1, *offsets.last().unwrap());
    fill_states(&mut scratch.state_alleles, &[vec![1, 0, 1]]);
    let obs = vec![-1, -1, -1];
    hmm.switch_probs(1, &mut scratch.p_switch);
    hmm.forward(&obs, &scratch.state_alleles, 1, &scratch.p_switch, &mut scratch.fwd);
    hmm.backward(&obs, &scratch.state_alleles, 1, &scratch.p_switch, &mut scratch.bwd);
    hmm.posteriors(
        &scratch.fwd,
        &scratch.bwd,
        &scratch.state_alleles,
        1,
        &offsets,
        &mut scratch.al_probs1,
    );
    assert_relative_eq!(scratch.al_probs1[offsets[0] + 1], 1.0, epsilon = 1e-12);
    assert_relative_eq!(scratch.al_probs1[offsets[1]], 1.0, epsilon = 1e-12);
    assert_relative_eq!(scratch.al_probs1[offsets[2] + 1], 1.0, epsilon = 1e-12);
}

#[test]
fn zero_genetic_distance_means_no_switch() {
    let n_markers = 3;
    let markers = biallelic_markers(n_markers);
    let gen_pos = vec![0.5, 0.5, 0.5];
    let hmm = LiStephensHmm::new(&markers, &gen_pos, HmmParams { rho: 0.04, err: 1e-4 });
    let mut p_switch = Vec::new();
    hmm.switch_probs(4, &mut p_switch);
    assert_eq!(p_switch, vec![0.0, 0.0, 0.0]);
}

#[test]
fn posterior_mass_switches_states_across_a_hot_recombination_interval() {
    // two reference haplotypes: all-0 and all-1; the target copies hap A
    // for markers 0..5 and hap B for 5..10, with a large genetic gap
    // between markers 4 and 5
    let n_markers = 10;
    let k = 2;
    let markers = biallelic_markers(n_markers);
    let mut gen_pos: Vec<f64> = (0..n_markers).map(|m| 0.01 * m as f64).collect();
    for cm in gen_pos.iter_mut().skip(5) {
        *cm += 50.0;
    }
    let hmm = LiStephensHmm::new(&markers, &gen_pos, HmmParams { rho: 0.04, err: 1e-4 });
    let offsets = al_offsets(&markers);
    let mut scratch = HmmScratch::new(n_markers, k, *offsets.last().unwrap());
    fill_states(
        &mut scratch.state_alleles,
        &[vec![0u16; n_markers], vec![1u16; n_markers]],
    );
    let obs: Vec<i32> = (0..n_markers).map(|m| if m < 5 { 0 } else { 1 }).collect();
    hmm.switch_probs(k, &mut scratch.p_switch);
    hmm.forward(&obs, &scratch.state_alleles, k, &scratch.p_switch, &mut scratch.fwd);
    hmm.backward(&obs, &scratch.state_alleles, k, &scratch.p_switch, &mut scratch.bwd);
    hmm.posteriors(
        &scratch.fwd,
        &scratch.bwd,
        &scratch.state_alleles,
        k,
        &offsets,
        &mut scratch.al_probs1,
    );
    // majority mass sits on allele 0 through marker 4 and on allele 1
    // from marker 5 on
    assert!(scratch.al_probs1[offsets[4]] > 0.95);
    assert!(scratch.al_probs1[offsets[5] + 1] > 0.95);
    for m in 0..n_markers {
        let sum: f64 = scratch.al_probs1[offsets[m]..offsets[m + 1]].iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
    }
}
