//! Mel filter bank for Whisper's log-mel spectrogram.
//!
//! Whisper was trained on features computed with librosa's Slaney-style filter
//! bank (`librosa.filters.mel(sr, n_fft, n_mels)` with area normalization), so
//! that is what is reproduced here instead of shipping a binary filter file.
//! The result is laid out row-major as `[n_mels][n_fft / 2 + 1]`, the layout
//! `whisper::audio::pcm_to_mel` expects.

/// Hz per mel in the linear part of the Slaney scale.
const LINEAR_HZ_PER_MEL: f64 = 200.0 / 3.0;
/// Where the Slaney scale switches from linear to logarithmic.
const LOG_REGION_START_HZ: f64 = 1000.0;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    let min_log_mel = LOG_REGION_START_HZ / LINEAR_HZ_PER_MEL;
    if hz >= LOG_REGION_START_HZ {
        min_log_mel + (hz / LOG_REGION_START_HZ).ln() / log_step()
    } else {
        hz / LINEAR_HZ_PER_MEL
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    let min_log_mel = LOG_REGION_START_HZ / LINEAR_HZ_PER_MEL;
    if mel >= min_log_mel {
        LOG_REGION_START_HZ * (log_step() * (mel - min_log_mel)).exp()
    } else {
        mel * LINEAR_HZ_PER_MEL
    }
}

/// Triangular filters spanning 0 Hz to Nyquist, each normalized to unit area.
pub fn mel_filter_bank(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<f32> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|bin| bin as f64 * nyquist / (n_bins - 1) as f64)
        .collect();

    let max_mel = hz_to_mel(nyquist);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_bins];
    for mel in 0..n_mels {
        let (lower, center, upper) = (edges[mel], edges[mel + 1], edges[mel + 2]);
        let norm = 2.0 / (upper - lower);
        for (bin, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[mel * n_bins + bin] = (weight * norm) as f32;
        }
    }
    filters
}
