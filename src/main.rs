use std::error::Error;
use log::{info, warn};
use tp_scaling::{comparison_figure, data_path, show, Dataset};

// Range of system sizes the sweep was run for; these select the
// datafile, they do not filter rows.
const N_START: u32 = 4;
const N_STOP: u32 = 24;

const OUTPUT: &str = "N_vs_t_p_for_unsymmetric_del_omega.pdf";

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = data_path(N_START, N_STOP);
    info!("loading {}", path.display());
    let data = Dataset::load(&path)?;
    info!("{} sweep points, N = {} .. {}",
          data.len(), N_START, N_STOP);

    let fig = comparison_figure(&data)?;
    fig.save().to_file(OUTPUT)?;
    info!("wrote {}", OUTPUT);

    // The figure is already on disk; no window is fine (e.g. on a
    // headless box).
    if let Err(e) = show() {
        warn!("could not open a display window: {}", e);
    }
    Ok(())
}
