//! Binary acoustic model container.
//!
//! A versioned big-endian container holding a complete acoustic model.
//! The header magic is followed by a qualifier string whose `_V` flag
//! marks pre-inverted variances and `_E` marks embedded analysis
//! parameters. Sections follow in a fixed order: options, tying flag,
//! transition matrices, variances, densities, optional tied-mixture
//! codebooks, states, and model definitions. All cross-references are
//! dense 0-based ids; `0xFFFF_FFFF` marks an absent reference.

use super::{
    AcousticModel, Density, HmmState, Mixture, PhysicalHmm, Transition,
};
use crate::config::AnalysisConfig;
use crate::error::{DecodeError, Result};
use std::path::Path;
use tracing::info;

const HEADER_MAGIC: &str = "ardea-binhmm-v2";
const QUAL_VARINV: &str = "_V";
const QUAL_EMBEDPARA: &str = "_E";
const PARA_VERSION: u16 = 2;
const ID_NONE: u32 = u32::MAX;

/// Analysis parameters embedded in a model file.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedParams {
    /// Sampling frequency in Hz.
    pub sample_rate: u32,
    /// Window size in samples.
    pub frame_size: u32,
    /// Window shift in samples.
    pub frame_shift: u32,
    /// Pre-emphasis coefficient.
    pub preemph: f32,
    /// Cepstral liftering coefficient.
    pub lifter: u32,
    /// Number of filterbank channels.
    pub fbank_num: u32,
    /// Delta window width.
    pub delta_window: u32,
    /// Acceleration window width.
    pub accel_window: u32,
    /// Silence floor in dB.
    pub silence_floor: f32,
    /// Energy scaling factor.
    pub escale: f32,
    /// Normalise log energy.
    pub energy_normalize: bool,
    /// Use raw energy.
    pub raw_energy: bool,
    /// Frame-wise DC removal.
    pub zmean_frame: bool,
}

impl EmbeddedParams {
    /// Copy these parameters over an analysis configuration.
    pub fn apply_to(&self, config: &mut AnalysisConfig) {
        config.sample_rate = self.sample_rate;
        config.frame_size = self.frame_size as usize;
        config.frame_shift = self.frame_shift as usize;
        config.preemph = self.preemph;
        config.lifter = self.lifter as usize;
        config.fbank_num = self.fbank_num as usize;
        config.delta_window = self.delta_window as usize;
        config.accel_window = self.accel_window as usize;
        config.silence_floor = self.silence_floor;
        config.escale = self.escale;
        config.energy_normalize = self.energy_normalize;
        config.raw_energy = self.raw_energy;
        config.zmean_frame = self.zmean_frame;
    }

    /// Capture the relevant subset of an analysis configuration.
    #[must_use]
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frame_size: config.frame_size as u32,
            frame_shift: config.frame_shift as u32,
            preemph: config.preemph,
            lifter: config.lifter as u32,
            fbank_num: config.fbank_num as u32,
            delta_window: config.delta_window as u32,
            accel_window: config.accel_window as u32,
            silence_floor: config.silence_floor,
            escale: config.escale,
            energy_normalize: config.energy_normalize,
            raw_energy: config.raw_energy,
            zmean_frame: config.zmean_frame,
        }
    }
}

/// Load a binary acoustic model file.
///
/// Returns the model and the embedded analysis parameters if present.
///
/// # Errors
///
/// Returns a `Model` error for any malformed section.
pub fn load(path: &Path) -> Result<(AcousticModel, Option<EmbeddedParams>)> {
    let data = std::fs::read(path)?;
    let mut r = Reader::new(&data, path);

    let magic = r.cstr()?;
    if magic != HEADER_MAGIC {
        return Err(DecodeError::Model(format!(
            "{}: not a binary acoustic model (bad magic)",
            path.display()
        )));
    }
    let qualifier = r.cstr()?;
    let variance_inverted = qualifier.contains(QUAL_VARINV);
    let has_para = qualifier.contains(QUAL_EMBEDPARA);

    let para = if has_para { Some(read_para(&mut r)?) } else { None };

    // Options.
    let _num_streams = r.u16()?;
    let veclen = r.u16()? as usize;
    let _cov_type = r.u16()?;
    let _param_kind = r.u16()?;

    // Tying.
    let tied_mixture = r.u8()? != 0;
    let max_mixture = r.u32()? as usize;

    let mut am = AcousticModel::new(veclen);
    am.variance_inverted = variance_inverted;
    am.tied_mixture = tied_mixture;

    // Transition matrices.
    let tr_num = r.u32()? as usize;
    for _ in 0..tr_num {
        let _name = r.cstr()?;
        let nstate = r.u16()? as usize;
        let mut a = Vec::with_capacity(nstate * nstate);
        for _ in 0..nstate * nstate {
            a.push(r.f32()?);
        }
        am.add_transition(Transition { nstate, a });
    }

    // Variances.
    let vr_num = r.u32()? as usize;
    let mut variances = Vec::with_capacity(vr_num);
    for _ in 0..vr_num {
        let _name = r.cstr()?;
        let len = r.u16()? as usize;
        let mut vec = Vec::with_capacity(len);
        for _ in 0..len {
            vec.push(r.f32()?);
        }
        variances.push(vec);
    }

    // Densities.
    let dens_num = r.u32()? as usize;
    for _ in 0..dens_num {
        let _name = r.cstr()?;
        let meanlen = r.u16()? as usize;
        if meanlen != veclen {
            return Err(DecodeError::Model(format!(
                "{}: density length {meanlen} does not match vector size {veclen}",
                path.display()
            )));
        }
        let mut mean = Vec::with_capacity(meanlen);
        for _ in 0..meanlen {
            mean.push(r.f32()?);
        }
        let vid = r.u32()? as usize;
        let gconst = r.f32()?;
        let var = variances.get(vid).ok_or_else(|| {
            DecodeError::Model(format!("{}: density references bad variance {vid}", path.display()))
        })?;
        let ivar: Vec<f32> = if variance_inverted {
            var.clone()
        } else {
            var.iter().map(|v| 1.0 / v.max(1e-10)).collect()
        };
        am.add_density(Density {
            mean,
            ivar,
            gconst,
        });
    }

    // Tied-mixture codebooks.
    let mut codebooks: Vec<Vec<usize>> = Vec::new();
    if tied_mixture {
        let tm_num = r.u32()? as usize;
        for _ in 0..tm_num {
            let _name = r.cstr()?;
            let num = r.u32()? as usize;
            let mut ids = Vec::with_capacity(num);
            for _ in 0..num {
                let did = r.u32()?;
                if did != ID_NONE {
                    ids.push(did as usize);
                }
            }
            codebooks.push(ids);
        }
    }

    // States.
    let st_num = r.u32()? as usize;
    for _ in 0..st_num {
        let _name = r.cstr()?;
        let mix_num = r.u16()? as i16;
        let density_ids: Vec<usize> = if mix_num == -1 {
            let cid = r.u32()? as usize;
            codebooks
                .get(cid)
                .ok_or_else(|| {
                    DecodeError::Model(format!(
                        "{}: state references bad codebook {cid}",
                        path.display()
                    ))
                })?
                .clone()
        } else {
            let mut ids = Vec::with_capacity(mix_num as usize);
            for _ in 0..mix_num {
                let did = r.u32()? as usize;
                if did >= dens_num {
                    return Err(DecodeError::Model(format!(
                        "{}: state references bad density {did}",
                        path.display()
                    )));
                }
                ids.push(did);
            }
            ids
        };
        let mut mixtures = Vec::with_capacity(density_ids.len());
        for did in density_ids {
            let weight = r.f32()?;
            mixtures.push(Mixture {
                density: did,
                weight,
            });
        }
        am.add_state(HmmState { mixtures });
    }

    // Model definitions.
    let md_num = r.u32()? as usize;
    for _ in 0..md_num {
        let name = r.cstr()?;
        let nstate = r.u16()? as usize;
        if nstate < 3 {
            return Err(DecodeError::Model(format!(
                "{}: model {name} has too few states",
                path.display()
            )));
        }
        let mut states = Vec::with_capacity(nstate - 2);
        for _ in 0..nstate - 2 {
            let sid = r.u32()? as usize;
            if sid >= st_num {
                return Err(DecodeError::Model(format!(
                    "{}: model {name} references bad state {sid}",
                    path.display()
                )));
            }
            states.push(sid);
        }
        let tid = r.u32()? as usize;
        if tid >= tr_num {
            return Err(DecodeError::Model(format!(
                "{}: model {name} references bad transition {tid}",
                path.display()
            )));
        }
        am.add_physical(PhysicalHmm {
            name,
            states,
            trans: tid,
        })?;
    }

    am.max_mixture = am.max_mixture.max(max_mixture);
    info!(
        "loaded acoustic model: {} models, {} states, {} densities, veclen {}",
        am.physical.len(),
        am.states.len(),
        am.densities.len(),
        am.veclen
    );
    Ok((am, para))
}

/// Write a model as a binary container.
///
/// Variances are written pre-inverted (the in-memory form), so the `_V`
/// qualifier is always set.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub fn save(am: &AcousticModel, para: Option<&EmbeddedParams>, path: &Path) -> Result<()> {
    let mut w = Writer::new();
    w.cstr(HEADER_MAGIC);
    let mut qualifier = String::from(QUAL_VARINV);
    if para.is_some() {
        qualifier.push_str(QUAL_EMBEDPARA);
    }
    w.cstr(&qualifier);
    if let Some(p) = para {
        write_para(&mut w, p);
    }

    w.u16(1);
    w.u16(am.veclen as u16);
    w.u16(1); // covariance kind: diagonal
    w.u16(crate::htkparam::BASE_MFCC);

    w.u8(u8::from(am.tied_mixture));
    w.u32(am.max_mixture as u32);

    w.u32(am.transitions.len() as u32);
    for t in &am.transitions {
        w.cstr("");
        w.u16(t.nstate as u16);
        for &v in &t.a {
            w.f32(v);
        }
    }

    // In-memory densities hold inverse variances; write them as the
    // variance section.
    w.u32(am.densities.len() as u32);
    for d in &am.densities {
        w.cstr("");
        w.u16(d.ivar.len() as u16);
        for &v in &d.ivar {
            w.f32(v);
        }
    }

    w.u32(am.densities.len() as u32);
    for (i, d) in am.densities.iter().enumerate() {
        w.cstr("");
        w.u16(d.mean.len() as u16);
        for &v in &d.mean {
            w.f32(v);
        }
        w.u32(i as u32);
        w.f32(d.gconst);
    }

    if am.tied_mixture {
        // Codebooks are not retained in memory; emit one per state.
        w.u32(am.states.len() as u32);
        for s in &am.states {
            w.cstr("");
            w.u32(s.mixtures.len() as u32);
            for m in &s.mixtures {
                w.u32(m.density as u32);
            }
        }
    }

    w.u32(am.states.len() as u32);
    for s in &am.states {
        w.cstr("");
        w.u16(s.mixtures.len() as u16);
        for m in &s.mixtures {
            w.u32(m.density as u32);
        }
        for m in &s.mixtures {
            w.f32(m.weight);
        }
    }

    w.u32(am.physical.len() as u32);
    for p in &am.physical {
        w.cstr(&p.name);
        w.u16((p.states.len() + 2) as u16);
        for &s in &p.states {
            w.u32(s as u32);
        }
        w.u32(p.trans as u32);
    }

    std::fs::write(path, w.into_inner())?;
    Ok(())
}

fn read_para(r: &mut Reader<'_>) -> Result<EmbeddedParams> {
    let version = r.u16()?;
    if version > PARA_VERSION {
        return Err(DecodeError::Model(format!(
            "unknown embedded parameter version {version}"
        )));
    }
    Ok(EmbeddedParams {
        sample_rate: r.u32()?,
        frame_size: r.u32()?,
        frame_shift: r.u32()?,
        preemph: r.f32()?,
        lifter: r.u32()?,
        fbank_num: r.u32()?,
        delta_window: r.u32()?,
        accel_window: r.u32()?,
        silence_floor: r.f32()?,
        escale: r.f32()?,
        energy_normalize: r.u8()? != 0,
        raw_energy: r.u8()? != 0,
        zmean_frame: r.u8()? != 0,
    })
}

fn write_para(w: &mut Writer, p: &EmbeddedParams) {
    w.u16(PARA_VERSION);
    w.u32(p.sample_rate);
    w.u32(p.frame_size);
    w.u32(p.frame_shift);
    w.f32(p.preemph);
    w.u32(p.lifter);
    w.u32(p.fbank_num);
    w.u32(p.delta_window);
    w.u32(p.accel_window);
    w.f32(p.silence_floor);
    w.f32(p.escale);
    w.u8(u8::from(p.energy_normalize));
    w.u8(u8::from(p.raw_energy));
    w.u8(u8::from(p.zmean_frame));
}

/// Big-endian section reader over an in-memory buffer.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], path: &'a Path) -> Self {
        Self { data, pos: 0, path }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(DecodeError::Model(format!(
                "{}: unexpected end of file",
                self.path.display()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Err(DecodeError::Model(format!(
                "{}: unterminated string",
                self.path.display()
            )));
        }
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(s)
    }
}

/// Big-endian section writer.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::LOG_ZERO;

    fn tiny_model() -> AcousticModel {
        let mut am = AcousticModel::new(2);
        let d0 = am.add_density(Density::from_variance(vec![0.0, 0.0], &[1.0, 1.0]));
        let d1 = am.add_density(Density::from_variance(vec![3.0, -1.0], &[2.0, 0.5]));
        let s0 = am.add_state(HmmState {
            mixtures: vec![
                Mixture {
                    density: d0,
                    weight: 0.5f32.ln(),
                },
                Mixture {
                    density: d1,
                    weight: 0.5f32.ln(),
                },
            ],
        });
        let half = 0.5f32.ln();
        let t = am.add_transition(Transition {
            nstate: 3,
            a: vec![
                LOG_ZERO, 0.0, LOG_ZERO,
                LOG_ZERO, half, half,
                LOG_ZERO, LOG_ZERO, LOG_ZERO,
            ],
        });
        am.add_physical(PhysicalHmm {
            name: "a".into(),
            states: vec![s0],
            trans: t,
        })
        .unwrap();
        am
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bam");
        let am = tiny_model();
        save(&am, None, &path).unwrap();

        let (loaded, para) = load(&path).unwrap();
        assert!(para.is_none());
        assert!(loaded.variance_inverted);
        assert_eq!(loaded.veclen, 2);
        assert_eq!(loaded.densities.len(), am.densities.len());
        assert_eq!(loaded.states.len(), am.states.len());
        assert_eq!(loaded.physical.len(), 1);
        assert_eq!(loaded.physical[0].name, "a");
        assert_eq!(loaded.densities[1].mean, am.densities[1].mean);
        assert_eq!(loaded.densities[1].ivar, am.densities[1].ivar);
    }

    #[test]
    fn embedded_params_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bam");
        let am = tiny_model();
        let para = EmbeddedParams::from_config(&AnalysisConfig::default());
        save(&am, Some(&para), &path).unwrap();

        let (_, loaded) = load(&path).unwrap();
        assert_eq!(loaded, Some(para));
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bam");
        std::fs::write(&path, b"not a model\0rest\0").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bam");
        let am = tiny_model();
        save(&am, None, &path).unwrap();
        let mut raw = std::fs::read(&path).unwrap();
        raw.truncate(raw.len() / 2);
        std::fs::write(&path, &raw).unwrap();
        assert!(load(&path).is_err());
    }
}
