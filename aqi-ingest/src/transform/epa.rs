use aqi_client::domain::Aqi;

/// Applies the EPA stepwise correction to a raw PM2.5 reading (µg/m³)
/// using relative humidity (%).
///
/// Returns `None` when the raw reading is missing, negative or not finite,
/// or when humidity is missing.
pub fn correct(raw: Option<f64>, rh: Option<f64>) -> Option<f64> {
    let (x, rh) = match (raw, rh) {
        (Some(x), Some(rh)) if x.is_finite() && x >= 0.0 => (x, rh),
        _ => return None,
    };

    let corrected = if x < 30.0 {
        0.524 * x - 0.0862 * rh + 5.75
    } else if x < 50.0 {
        let w = x / 20.0 - 1.5;
        (0.786 * w + 0.524 * (1.0 - w)) * x - 0.0862 * rh + 5.75
    } else if x < 210.0 {
        0.786 * x - 0.0862 * rh + 5.75
    } else if x < 260.0 {
        let w = x / 50.0 - 4.2;
        (0.69 * w + 0.786 * (1.0 - w)) * x
            - 0.0862 * rh * (1.0 - w)
            + 2.966 * w
            + 5.75 * (1.0 - w)
            + 8.84e-4 * x * x * w
    } else {
        2.966 + 0.69 * x + 8.84e-4 * x * x
    };

    Some(corrected)
}

/// One EPA breakpoint band: concentrations above `above` map
/// `[bp_low, bp_high]` onto `[i_low, i_high]`.
struct Band {
    above: f64,
    i_high: f64,
    i_low: f64,
    bp_high: f64,
    bp_low: f64,
}

// Descending; the first band whose threshold is strictly exceeded wins.
const BANDS: [Band; 6] = [
    Band { above: 350.5, i_high: 500.0, i_low: 401.0, bp_high: 500.4, bp_low: 350.5 },
    Band { above: 250.5, i_high: 400.0, i_low: 301.0, bp_high: 350.4, bp_low: 250.5 },
    Band { above: 150.5, i_high: 300.0, i_low: 201.0, bp_high: 250.4, bp_low: 150.5 },
    Band { above: 55.5, i_high: 200.0, i_low: 151.0, bp_high: 150.4, bp_low: 55.5 },
    Band { above: 35.5, i_high: 150.0, i_low: 101.0, bp_high: 55.4, bp_low: 35.5 },
    Band { above: 12.1, i_high: 100.0, i_low: 51.0, bp_high: 35.4, bp_low: 12.1 },
];

const GOOD: Band = Band { above: f64::NEG_INFINITY, i_high: 50.0, i_low: 0.0, bp_high: 12.0, bp_low: 0.0 };

/// Upper bound of accepted concentrations; anything above is undefined.
const MAX_CONCENTRATION: f64 = 1000.0;

fn interpolate(pm: f64, band: &Band) -> Aqi {
    let index = (band.i_high - band.i_low) / (band.bp_high - band.bp_low) * (pm - band.bp_low) + band.i_low;
    Aqi::Index(index.round_ties_even() as i32)
}

/// Maps a PM2.5 concentration onto the EPA AQI scale.
///
/// Negative concentrations are returned unchanged as [`Aqi::Passthrough`].
pub fn aqi_from_concentration(pm: Option<f64>) -> Aqi {
    let pm = match pm {
        Some(pm) if !pm.is_nan() => pm,
        _ => return Aqi::Undefined,
    };

    if pm < 0.0 {
        return Aqi::Passthrough(pm);
    }
    if pm > MAX_CONCENTRATION {
        return Aqi::Undefined;
    }

    let band = BANDS.iter().find(|b| pm > b.above).unwrap_or(&GOOD);
    interpolate(pm, band)
}

/// Text entry point: unparsable input is undefined rather than an error.
pub fn aqi_from_text(pm: &str) -> Aqi {
    aqi_from_concentration(pm.trim().parse::<f64>().ok())
}
