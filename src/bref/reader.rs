use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::bref::bits::{packed_len, BitReader};
use crate::bref::writer::{BrefBlock, BREF3_MAGIC, END_OF_DATA};
use crate::model::chrom_ids::ChromIds;
use crate::model::marker::{bit_len, Marker};
use crate::model::ref_gt_rec::{AlleleCodedRec, RefGTRec, SeqCodedRec};
use crate::model::samples::Samples;
use crate::utils::errors::KelpieError;

/**
 * Pull reader over a bref3 stream: one decoded RefGTRec per call, in
 * marker order, buffering a single block at a time. Chromosome names are
 * interned into the driver-owned ChromIds registry as they appear, and the
 * block seek index is rebuilt while scanning.
 */
pub struct Bref3Reader<'a, R: Read> {
    input: R,
    chrom_ids: &'a mut ChromIds,
    program: String,
    samples: Arc<Samples>,
    pending: VecDeque<RefGTRec>,
    blocks: Vec<BrefBlock>,
    offset: u64,
    done: bool,
}

impl<'a, R: Read> Bref3Reader<'a, R> {
    pub fn new(mut input: R, chrom_ids: &'a mut ChromIds) -> Result<Bref3Reader<'a, R>, KelpieError> {
        let mut magic = [0u8; 5];
        input
            .read_exact(&mut magic)
            .map_err(|_| KelpieError::Format("Not a bref3 stream: short header".to_string()))?;
        if &magic != BREF3_MAGIC {
            return Err(KelpieError::Format(format!(
                "Bad bref3 magic: {:?}",
                magic
            )));
        }
        let mut offset = magic.len() as u64;
        let program = read_string(&mut input, &mut offset)?;
        let n_samples = read_i32(&mut input, &mut offset)?;
        if n_samples <= 0 {
            return Err(KelpieError::Format(format!(
                "Non-positive sample count {} in bref3 header",
                n_samples
            )));
        }
        let mut ids = Vec::with_capacity(n_samples as usize);
        for _ in 0..n_samples {
            ids.push(read_string(&mut input, &mut offset)?);
        }
        let samples = Arc::new(Samples::from_ids(ids)?);
        Ok(Bref3Reader {
            input,
            chrom_ids,
            program,
            samples,
            pending: VecDeque::new(),
            blocks: Vec::new(),
            offset,
            done: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn samples(&self) -> &Arc<Samples> {
        &self.samples
    }

    /// Seek index of the blocks decoded so far.
    pub fn blocks(&self) -> &[BrefBlock] {
        &self.blocks
    }

    /// Next record in marker order, or None after the end-of-data sentinel.
    pub fn next_rec(&mut self) -> Result<Option<RefGTRec>, KelpieError> {
        loop {
            if let Some(rec) = self.pending.pop_front() {
                return Ok(Some(rec));
            }
            if self.done {
                return Ok(None);
            }
            self.read_block()?;
        }
    }

    fn read_block(&mut self) -> Result<(), KelpieError> {
        let block_offset = self.offset;
        let n_seq = read_u16(&mut self.input, &mut self.offset)?;
        if n_seq == END_OF_DATA {
            self.done = true;
            return Ok(());
        }
        if n_seq == 0 {
            let rec = self.read_passthrough()?;
            self.blocks.push(BrefBlock {
                chrom: rec.marker().chrom(),
                pos: rec.marker().pos(),
                offset: block_offset,
            });
            self.pending.push_back(rec);
            return Ok(());
        }
        let n_seq = n_seq as usize;
        let n_haps = self.samples.n_haps();
        let hap_width = bit_len(n_seq - 1);
        let packed = self.read_bytes(packed_len(n_haps, hap_width))?;
        let mut bits = BitReader::new(&packed);
        let mut hap_to_seq = Vec::with_capacity(n_haps);
        for _ in 0..n_haps {
            let seq = bits.read(hap_width)?;
            if seq as usize >= n_seq {
                return Err(KelpieError::Format(format!(
                    "hap2seq value {} out of range [0, {})",
                    seq, n_seq
                )));
            }
            hap_to_seq.push(seq as u16);
        }
        let hap_to_seq = Arc::new(hap_to_seq);
        let n_markers = read_i32(&mut self.input, &mut self.offset)?;
        if n_markers <= 0 {
            return Err(KelpieError::Format(format!(
                "Sequence block with {} markers",
                n_markers
            )));
        }
        for m in 0..n_markers {
            let marker = self.read_marker()?;
            let marker_chrom = marker.chrom();
            let marker_pos = marker.pos();
            let allele_width = bit_len(marker.n_alleles() - 1);
            let packed = self.read_bytes(packed_len(n_seq, allele_width))?;
            let mut bits = BitReader::new(&packed);
            let mut seq_to_allele = Vec::with_capacity(n_seq);
            for _ in 0..n_seq {
                seq_to_allele.push(bits.read(allele_width)? as u8);
            }
            let rec = SeqCodedRec::new(
                marker,
                self.samples.clone(),
                hap_to_seq.clone(),
                seq_to_allele,
            )?;
            if m == 0 {
                self.blocks.push(BrefBlock {
                    chrom: marker_chrom,
                    pos: marker_pos,
                    offset: block_offset,
                });
            }
            self.pending.push_back(RefGTRec::SeqCoded(rec));
        }
        Ok(())
    }

    fn read_passthrough(&mut self) -> Result<RefGTRec, KelpieError> {
        let marker = self.read_marker()?;
        let n_haps = self.samples.n_haps();
        let index_width = bit_len(n_haps - 1);
        let mut major: Option<usize> = None;
        let mut lists: Vec<Vec<u32>> = Vec::with_capacity(marker.n_alleles());
        for a in 0..marker.n_alleles() {
            let count = read_i32(&mut self.input, &mut self.offset)?;
            if count == -1 {
                if major.is_some() {
                    return Err(KelpieError::Format(
                        "Passthrough block with two major alleles".to_string(),
                    ));
                }
                major = Some(a);
                lists.push(Vec::new());
                continue;
            }
            if count < 0 || count as usize > n_haps {
                return Err(KelpieError::Format(format!(
                    "Carrier count {} out of range at {}:{}",
                    count,
                    marker.chrom(),
                    marker.pos()
                )));
            }
            let packed = self.read_bytes(packed_len(count as usize, index_width))?;
            let mut bits = BitReader::new(&packed);
            let mut list = Vec::with_capacity(count as usize);
            for _ in 0..count {
                list.push(bits.read(index_width)?);
            }
            lists.push(list);
        }
        let major = major.ok_or_else(|| {
            KelpieError::Format("Passthrough block without a major allele".to_string())
        })?;
        let rec = AlleleCodedRec::new(marker, self.samples.clone(), major as u16, lists)?;
        Ok(RefGTRec::AlleleCoded(rec))
    }

    fn read_marker(&mut self) -> Result<Marker, KelpieError> {
        let chrom_name = read_string(&mut self.input, &mut self.offset)?;
        let chrom = self.chrom_ids.get_or_insert(&chrom_name)?;
        let pos = read_i32(&mut self.input, &mut self.offset)?;
        if pos <= 0 {
            return Err(KelpieError::Format(format!(
                "Non-positive marker position {} on {}",
                pos, chrom_name
            )));
        }
        let n_alleles = read_i32(&mut self.input, &mut self.offset)?;
        if n_alleles <= 0 {
            return Err(KelpieError::Format(format!(
                "Marker {}:{} with {} alleles",
                chrom_name, pos, n_alleles
            )));
        }
        let mut alleles = Vec::with_capacity(n_alleles as usize);
        for _ in 0..n_alleles {
            alleles.push(read_string(&mut self.input, &mut self.offset)?);
        }
        Marker::new(chrom, pos as u32, None, alleles)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, KelpieError> {
        let mut buf = vec![0u8; n];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| KelpieError::Format("Truncated bref3 stream".to_string()))?;
        self.offset += n as u64;
        Ok(buf)
    }
}

/**
 * Reads a whole bref3 reference panel from disk: sample list, records in
 * marker order, and the block seek index.
 */
pub fn read_ref_panel(
    path: &Path,
    chrom_ids: &mut ChromIds,
) -> Result<(Arc<Samples>, Vec<RefGTRec>, Vec<BrefBlock>), KelpieError> {
    let file = File::open(path)
        .map_err(|e| KelpieError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = Bref3Reader::new(BufReader::new(file), chrom_ids)?;
    let samples = reader.samples().clone();
    let mut recs = Vec::new();
    while let Some(rec) = reader.next_rec()? {
        recs.push(rec);
    }
    let blocks = reader.blocks.clone();
    debug!(
        "Read {} reference records in {} blocks from {}",
        recs.len(),
        blocks.len(),
        path.display()
    );
    Ok((samples, recs, blocks))
}

fn read_u16<R: Read>(input: &mut R, offset: &mut u64) -> Result<u16, KelpieError> {
    let mut buf = [0u8; 2];
    input
        .read_exact(&mut buf)
        .map_err(|_| KelpieError::Format("Truncated bref3 stream".to_string()))?;
    *offset += 2;
    Ok(u16::from_be_bytes(buf))
}

fn read_i32<R: Read>(input: &mut R, offset: &mut u64) -> Result<i32, KelpieError> {
    let mut buf = [0u8; 4];
    input
        .read_exact(&mut buf)
        .map_err(|_| KelpieError::Format("Truncated bref3 stream".to_string()))?;
    *offset += 4;
    Ok(i32::from_be_bytes(buf))
}

fn read_string<R: Read>(input: &mut R, offset: &mut u64) -> Result<String, KelpieError> {
    let len = read_i32(input, offset)?;
    if len < 0 {
        return Err(KelpieError::Format(format!(
            "Negative string length {} in bref3 stream",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    input
        .read_exact(&mut buf)
        .map_err(|_| KelpieError::Format("Truncated bref3 stream".to_string()))?;
    *offset += len as u64;
    String::from_utf8(buf)
        .map_err(|_| KelpieError::Format("Invalid UTF-8 string in bref3 stream".to_string()))
}
