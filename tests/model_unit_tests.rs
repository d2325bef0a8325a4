extern crate kelpie_genome;

use std::io::Write;
use std::sync::Arc;

use kelpie_genome::haplotype::initial_haplotypes::InitialHaplotypes;
use kelpie_genome::model::chrom_ids::ChromIds;
use kelpie_genome::model::genetic_map::GeneticMap;
use kelpie_genome::model::marker::{Marker, Markers};
use kelpie_genome::model::ref_gt_rec::{AlleleCodedRec, RefGTRec, SeqCodedRec};
use kelpie_genome::model::samples::Samples;
use kelpie_genome::model::target_gt::{CalledGTRec, TargetData, TargetGT, MISSING_ALLELE};

fn marker(pos: u32, n_alleles: usize) -> Marker {
    let alleles: Vec<String> = ["A", "C", "G", "T", "AC", "AG", "AT", "CA"]
        .iter()
        .take(n_alleles)
        .map(|s| s.to_string())
        .collect();
    Marker::new(0, pos, None, alleles).unwrap()
}

fn samples(n: usize) -> Arc<Samples> {
    let ids = (0..n).map(|i| format!("sample{}", i)).collect();
    Arc::new(Samples::from_ids(ids).unwrap())
}

fn allele_coded(pos: u32, n_alleles: usize, alleles_by_hap: &[usize]) -> RefGTRec {
    let n_samples = alleles_by_hap.len() / 2;
    let mut lists = vec![Vec::new(); n_alleles];
    for (h, &a) in alleles_by_hap.iter().enumerate() {
        lists[a].push(h as u32);
    }
    RefGTRec::AlleleCoded(
        AlleleCodedRec::from_carrier_lists(marker(pos, n_alleles), samples(n_samples), lists)
            .unwrap(),
    )
}

#[test]
fn allele_counts_sum_to_n_haps() {
    let rec = allele_coded(100, 3, &[0, 1, 0, 0, 2, 0, 1, 0]);
    let total: usize = (0..rec.n_alleles()).map(|a| rec.allele_count(a)).sum();
    assert_eq!(total, rec.n_haps());
    assert_eq!(rec.major_allele(), 0);
    assert_eq!(rec.allele_count(0), 5);
    assert_eq!(rec.allele_count(1), 2);
    assert_eq!(rec.allele_count(2), 1);
    // the major count is the strict maximum
    for a in 0..rec.n_alleles() {
        if a != rec.major_allele() {
            assert!(rec.allele_count(rec.major_allele()) > rec.allele_count(a));
        }
    }
}

#[test]
fn major_allele_tie_breaks_to_smallest_index() {
    let rec = allele_coded(100, 2, &[0, 1, 1, 0]);
    assert_eq!(rec.major_allele(), 0);
}

#[test]
fn allele_and_sequence_coded_forms_agree() {
    let alleles_by_hap = [0usize, 1, 0, 2, 1, 0, 0, 0, 2, 0];
    let ac = allele_coded(500, 3, &alleles_by_hap);
    // sequence-code the same marker: one class per allele
    let hap_to_seq: Vec<u16> = alleles_by_hap.iter().map(|&a| a as u16).collect();
    let sc = RefGTRec::SeqCoded(
        SeqCodedRec::new(
            marker(500, 3),
            samples(5),
            Arc::new(hap_to_seq),
            vec![0, 1, 2],
        )
        .unwrap(),
    );
    for h in 0..ac.n_haps() {
        assert_eq!(ac.allele(h), sc.allele(h));
        assert_eq!(ac.allele(h), alleles_by_hap[h]);
    }
    for a in 0..3 {
        assert_eq!(ac.allele_count(a), sc.allele_count(a));
        for c in 0..ac.allele_count(a) {
            assert_eq!(ac.hap_index(a, c), sc.hap_index(a, c));
        }
    }
    let converted = sc.to_allele_coded();
    for h in 0..ac.n_haps() {
        assert_eq!(converted.allele(h), ac.allele(h));
    }
}

#[test]
fn sequence_coded_lookup_follows_hap_to_seq() {
    // hap2seq[h] = 7 with seq2allele = [0,1,0,0,1,1,0,2] resolves to allele 2
    let seq_to_allele = vec![0u8, 1, 0, 0, 1, 1, 0, 2];
    let mut hap_to_seq = vec![0u16; 8];
    hap_to_seq[5] = 7;
    let rec = SeqCodedRec::new(
        marker(42, 3),
        samples(4),
        Arc::new(hap_to_seq),
        seq_to_allele,
    )
    .unwrap();
    assert_eq!(rec.allele(5), 2);
    assert_eq!(rec.allele(0), 0);
}

#[test]
fn sequence_coded_rejects_out_of_range_seq() {
    let rec = SeqCodedRec::new(
        marker(42, 2),
        samples(2),
        Arc::new(vec![0, 1, 2, 9]),
        vec![0, 1, 0],
    );
    assert!(rec.is_err());
}

#[test]
fn genetic_map_interpolates_and_extrapolates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plink.map");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file, "1 . 0.0 1000000").unwrap();
        writeln!(file, "1 . 1.0 2000000").unwrap();
        writeln!(file, "1 . 3.0 3000000").unwrap();
        writeln!(file, "2 . 0.0 500000").unwrap();
        writeln!(file, "2 . 2.0 1500000").unwrap();
    }
    let mut chrom_ids = ChromIds::new();
    let map = GeneticMap::from_plink_file(&path, &mut chrom_ids).unwrap();
    let c1 = chrom_ids.index_of("1").unwrap();
    let c2 = chrom_ids.index_of("2").unwrap();
    // exact points
    assert!((map.gen_pos(c1, 1_000_000) - 0.0).abs() < 1e-9);
    assert!((map.gen_pos(c1, 3_000_000) - 3.0).abs() < 1e-9);
    // interpolation inside each interval
    assert!((map.gen_pos(c1, 1_500_000) - 0.5).abs() < 1e-9);
    assert!((map.gen_pos(c1, 2_500_000) - 2.0).abs() < 1e-9);
    // extrapolation with the terminal interval's slope
    assert!((map.gen_pos(c1, 500_000) - (-0.5)).abs() < 1e-9);
    assert!((map.gen_pos(c1, 3_500_000) - 4.0).abs() < 1e-9);
    // second chromosome is independent
    assert!((map.gen_pos(c2, 1_000_000) - 1.0).abs() < 1e-9);
    // unmapped chromosomes fall back to 1 cM/Mb
    let c3 = chrom_ids.get_or_insert("3").unwrap();
    assert!((map.gen_pos(c3, 2_000_000) - 2.0).abs() < 1e-9);
    assert!((map.gen_dist(c1, 1_000_000, 2_000_000) - 1.0).abs() < 1e-9);
}

#[test]
fn genetic_map_rejects_disordered_positions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.map");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "1 . 0.0 2000000").unwrap();
        writeln!(file, "1 . 1.0 1000000").unwrap();
    }
    let mut chrom_ids = ChromIds::new();
    assert!(GeneticMap::from_plink_file(&path, &mut chrom_ids).is_err());
}

fn window(n_markers: usize, alleles_by_hap: &[&[usize]]) -> (Arc<Markers>, Vec<RefGTRec>) {
    let recs: Vec<RefGTRec> = (0..n_markers)
        .map(|m| allele_coded(1_000_000 + 100_000 * m as u32, 2, alleles_by_hap[m]))
        .collect();
    let markers = Arc::new(
        Markers::new(recs.iter().map(|r| r.marker().clone()).collect()).unwrap(),
    );
    (markers, recs)
}

#[test]
fn initial_haplotypes_copy_called_alleles_and_fill_missing() {
    let ref_alleles: Vec<&[usize]> = vec![&[0, 0, 1, 1], &[0, 1, 0, 1], &[1, 1, 1, 0]];
    let (markers, recs) = window(3, &ref_alleles);
    let targ_samples = samples(2);
    // marker 0: sample0 phased 0|1, sample1 unphased 1/0
    // marker 2: sample0 half-missing, sample1 fully missing
    let data = TargetData::Called(vec![
        CalledGTRec::new(0, 2, vec![0, 1], vec![1, 0], vec![true, false]).unwrap(),
        CalledGTRec::new(
            2,
            2,
            vec![1, MISSING_ALLELE],
            vec![MISSING_ALLELE, MISSING_ALLELE],
            vec![false, false],
        )
        .unwrap(),
    ]);
    let target = TargetGT::new(targ_samples, &markers, data).unwrap();
    let init = InitialHaplotypes::new(markers.clone(), &recs, &target, 0.01, 7).unwrap();
    let pairs = init.sample_hap_pairs().unwrap();
    assert_eq!(pairs.len(), 2);
    // phased genotype is copied verbatim
    assert_eq!(pairs[0].allele1(0), 0);
    assert_eq!(pairs[0].allele2(0), 1);
    // unphased genotype keeps its allele multiset in some orientation
    let mut pair = [pairs[1].allele1(0), pairs[1].allele2(0)];
    pair.sort_unstable();
    assert_eq!(pair, [0, 1]);
    // the called half of a half-missing genotype is preserved
    assert_eq!(pairs[0].allele1(2), 1);
    // every filled allele is in range
    for pair in &pairs {
        for m in 0..3 {
            assert!(pair.allele1(m) < 2 && pair.allele2(m) < 2);
        }
    }
    // same seed reproduces the same pairs
    let again = init.sample_hap_pairs().unwrap();
    for (a, b) in pairs.iter().zip(again.iter()) {
        for m in 0..3 {
            assert_eq!(a.allele1(m), b.allele1(m));
            assert_eq!(a.allele2(m), b.allele2(m));
        }
    }
}

#[test]
fn frequency_floor_keeps_rare_alleles_drawable() {
    // allele 1 is absent from both panel and target at marker 0
    let ref_alleles: Vec<&[usize]> = vec![&[0, 0, 0, 0]];
    let (markers, recs) = window(1, &ref_alleles);
    let n_targets = 1000;
    let ids = (0..n_targets).map(|i| format!("t{}", i)).collect();
    let targ_samples = Arc::new(Samples::from_ids(ids).unwrap());
    let all_missing = vec![MISSING_ALLELE; n_targets];
    let data = TargetData::Called(vec![CalledGTRec::new(
        0,
        2,
        all_missing.clone(),
        all_missing,
        vec![false; n_targets],
    )
    .unwrap()]);
    let target = TargetGT::new(targ_samples, &markers, data).unwrap();
    let f_min = 0.1;
    let init = InitialHaplotypes::new(markers.clone(), &recs, &target, f_min, 11).unwrap();
    let freqs = init.allele_frequencies();
    // the floored-then-renormalized frequency stays close to f_min
    assert!(freqs[0][1] > f_min / 2.0);
    assert!(freqs[0][1] < 2.0 * f_min);
    // sampled haplotypes carry the rare allele at roughly that rate
    let pairs = init.sample_hap_pairs().unwrap();
    let rare: usize = pairs
        .iter()
        .map(|p| (p.allele1(0) == 1) as usize + (p.allele2(0) == 1) as usize)
        .sum();
    let expected = freqs[0][1] * 2.0 * n_targets as f64;
    assert!((rare as f64) > expected * 0.5, "rare draws: {}", rare);
    assert!((rare as f64) < expected * 1.5, "rare draws: {}", rare);
}

#[test]
fn likelihood_rows_are_normalized_and_zero_rejected() {
    let ref_alleles: Vec<&[usize]> = vec![&[0, 0, 1, 1]];
    let (markers, recs) = window(1, &ref_alleles);
    let targ_samples = samples(1);
    // likelihoods: hom-ref impossible, het certain, hom-alt impossible
    let gls = vec![0.0, 5.0, 0.0];
    let rec = kelpie_genome::model::target_gt::GlRec::new(0, 2, 1, gls).unwrap();
    assert!((rec.gl(0, 0, 1) - 1.0).abs() < 1e-12);
    assert!((rec.gl(0, 1, 0) - 1.0).abs() < 1e-12);
    assert_eq!(rec.gl(0, 0, 0), 0.0);
    let target = TargetGT::new(
        targ_samples,
        &markers,
        TargetData::Likelihoods(vec![rec]),
    )
    .unwrap();
    let init = InitialHaplotypes::new(markers.clone(), &recs, &target, 0.01, 3).unwrap();
    let pairs = init.sample_hap_pairs().unwrap();
    // the only genotype with non-zero likelihood is the heterozygote
    let mut drawn = [pairs[0].allele1(0), pairs[0].allele2(0)];
    drawn.sort_unstable();
    assert_eq!(drawn, [0, 1]);
}
