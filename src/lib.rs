//! Comparison figure of the minimum time `t_p` against system size.
//!
//! The crate reads a three-column table produced by the `t_p` sweep
//! (system size N, value published in Rogerro (2021), our computed
//! value) and renders both series on one axes through [Matplotlib][],
//! saving the figure as a PDF.  The interop layer keeps an interface
//! close to Matplotlib's explicit one while keeping a Rust flavor.
//!
//! [Matplotlib]: https://matplotlib.org/

use std::{
    fmt::{Display, Formatter},
    fs, io,
    path::{Path, PathBuf},
};
use lazy_static::lazy_static;
use log::debug;
use ndarray::Array2;
use numpy::PyArray1;
use pyo3::{
    prelude::*,
    intern,
    exceptions::{PyFileNotFoundError, PyPermissionError},
    types::PyDict,
};

macro_rules! getattr {
    ($py: ident, $lib: expr, $f: literal) => {
        $lib.getattr($py, intern!($py, $f)).unwrap()
    };
}

macro_rules! meth {
    ($obj: expr, $m: ident, $py: ident -> $args: expr, $kwargs: expr) => {
        Python::with_gil(|py| {
            let $py = py;
            $obj.call_method(py, intern!(py, stringify!($m)), $args, $kwargs)
        })
    };
    ($obj: expr, $m: ident, $args: expr) => {
        Python::with_gil(|py| {
            $obj.call_method1(py, intern!(py, stringify!($m)), $args)
        })
    };
}

/// Possible errors while loading the sweep data or driving matplotlib.
#[derive(Debug)]
pub enum Error {
    /// The Python library "matplotlib" was not found.
    NoMatplotlib,
    /// The input file (or an element of the output path) does not exist.
    FileNotFound(PathBuf),
    /// Permission denied to access or create the filesystem path.
    PermissionError,
    /// Other I/O error while reading the data file.
    Io(io::Error),
    /// A row does not have the expected number of columns.
    Columns { path: PathBuf, line: usize, expected: usize, found: usize },
    /// A token could not be parsed as a floating-point number.
    Number { path: PathBuf, line: usize, token: String },
    /// The file contains no data rows.
    Empty(PathBuf),
    /// Other Python errors.
    Python(PyErr),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::NoMatplotlib =>
                write!(f, "The matplotlib library has not been found.\n\
Please install it.  See https://matplotlib.org/\n\
If you use Anaconda, see https://github.com/PyO3/pyo3/issues/1554"),
            Error::FileNotFound(p) =>
                write!(f, "{}: no such file or directory (was the sweep \
                           run for this N range?)", p.display()),
            Error::PermissionError =>
                write!(f, "Permission denied to access or create the \
                           filesystem path"),
            Error::Io(e) =>
                write!(f, "I/O error reading the data file: {}", e),
            Error::Columns { path, line, expected, found } =>
                write!(f, "{}:{}: expected {} columns, found {}",
                       path.display(), line, expected, found),
            Error::Number { path, line, token } =>
                write!(f, "{}:{}: {:?} is not a floating-point number",
                       path.display(), line, token),
            Error::Empty(p) =>
                write!(f, "{}: no data rows", p.display()),
            Error::Python(e) =>
                write!(f, "Python error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

/// Import and return a handle to the module `$m`.
macro_rules! pyimport { ($m: literal) => {
    Python::with_gil(|py|
        PyModule::import(py, intern!(py, $m)).map(|m| m.into()))
}}

lazy_static! {
    // Import matplotlib modules.
    static ref MATPLOTLIB: Result<Py<PyModule>, PyErr> = {
        pyimport!("matplotlib")
    };
    static ref PYPLOT: Result<Py<PyModule>, PyErr> = {
        pyimport!("matplotlib.pyplot")
    };
}

/// Return a handle to the module `$m`.
/// ⚠ This may try to lock Python's GIL.  Make sure it is executed
/// outside a call to `Python::with_gil`.
macro_rules! pymod { ($m: ident) => {
    $m.as_ref().map_err(|_| Error::NoMatplotlib)
}}

/// Trait expressing that `Self` can be converted to a numpy.ndarray.
pub trait Data {
    fn to_numpy<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64>;
}

impl<T> Data for T where T: AsRef<[f64]> {
    fn to_numpy<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        PyArray1::from_slice(py, self.as_ref())
    }
}


////////////////////////////////////////////////////////////////////////
//
// Loading the sweep data

/// Path to the table written by the `t_p` sweep for the range
/// `n_start ..= n_stop`.
///
/// The layout mirrors the directory tree the sweep writes into:
/// `misc/datafiles/Rog/N_start_<start>/N_stop_<stop>/N_tpRog_tpmine.dat`.
pub fn data_path(n_start: u32, n_stop: u32) -> PathBuf {
    PathBuf::from(format!(
        "misc/datafiles/Rog/N_start_{n_start}/N_stop_{n_stop}\
         /N_tpRog_tpmine.dat"))
}

/// Read a whitespace-separated table of floats, one row per line.
///
/// Blank lines and lines starting with `#` are skipped.  Every row
/// must have the same number of columns as the first; the table must
/// have at least one row.
pub fn load_table(path: impl AsRef<Path>) -> Result<Array2<f64>, Error> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => Error::PermissionError,
        _ => Error::Io(e),
    })?;
    let mut values: Vec<f64> = Vec::new();
    let mut ncols = 0;
    let mut nrows = 0;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = values.len();
        for token in line.split_whitespace() {
            let v = token.parse().map_err(|_| Error::Number {
                path: path.to_path_buf(),
                line: i + 1,
                token: token.to_string(),
            })?;
            values.push(v);
        }
        let width = values.len() - before;
        if nrows == 0 {
            ncols = width;
        } else if width != ncols {
            return Err(Error::Columns {
                path: path.to_path_buf(),
                line: i + 1,
                expected: ncols,
                found: width,
            });
        }
        nrows += 1;
    }
    if nrows == 0 {
        return Err(Error::Empty(path.to_path_buf()));
    }
    Ok(Array2::from_shape_vec((nrows, ncols), values).unwrap())
}

/// One run of the sweep.  Row `i` pairs one system size with the
/// published `t_p` and ours; the three columns always have the same
/// length and are not modified after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// System size N (integer-valued, stored as floats).
    pub n_sites: Vec<f64>,
    /// `t_p` as published in Rogerro (2021).
    pub tp_reference: Vec<f64>,
    /// `t_p` from our computation.
    pub tp_computed: Vec<f64>,
}

impl Dataset {
    /// Load a three-column `N  t_p(Rogerro)  t_p(ours)` table.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let table = load_table(path)?;
        if table.ncols() != 3 {
            return Err(Error::Columns {
                path: path.to_path_buf(),
                line: 1,
                expected: 3,
                found: table.ncols(),
            });
        }
        debug!("{}: {} rows", path.display(), table.nrows());
        Ok(Dataset {
            n_sites: table.column(0).to_vec(),
            tp_reference: table.column(1).to_vec(),
            tp_computed: table.column(2).to_vec(),
        })
    }

    /// Number of sweep points (rows).
    pub fn len(&self) -> usize {
        self.n_sites.len()
    }

    /// Whether the sweep produced no points.
    pub fn is_empty(&self) -> bool {
        self.n_sites.is_empty()
    }
}


////////////////////////////////////////////////////////////////////////
//
// Matplotlib interop

#[derive(Debug, Clone)]
pub struct Axes {
    ax: PyObject,
}

/// The top level container for all the plot elements.
#[derive(Debug)]
pub struct Figure {
    fig: PyObject, // instance of matplotlib.figure.Figure
}

/// Apply the rcParams shared by the paper's figures: serif fonts,
/// thick axes, and the major/minor tick geometry.
///
/// Return an error if Matplotlib is not present on the system.
pub fn set_style() -> Result<(), Error> {
    let mpl = pymod!(MATPLOTLIB)?;
    Python::with_gil(|py| {
        let rc = getattr!(py, mpl, "rcParams");
        rc.call_method1(py, intern!(py, "__setitem__"),
                        ("font.family", "serif")).unwrap();
        for (k, v) in [
            ("font.size", 20.),
            ("xtick.major.size", 7.),
            ("xtick.major.width", 2.),
            ("xtick.major.pad", 8.),
            ("xtick.minor.size", 4.),
            ("xtick.minor.width", 2.),
            ("ytick.major.size", 7.),
            ("ytick.major.width", 2.),
            ("ytick.minor.size", 4.),
            ("ytick.minor.width", 2.),
            ("axes.linewidth", 2.),
        ] {
            rc.call_method1(py, intern!(py, "__setitem__"), (k, v)).unwrap();
        }
    });
    Ok(())
}

/// Return a new pyplot figure of `width` × `height` inches with a
/// single axes.
///
/// Return an error if Matplotlib is not present on the system.
pub fn subplots(width: f64, height: f64) -> Result<(Figure, Axes), Error> {
    let pyplot = pymod!(PYPLOT)?;
    Python::with_gil(|py| {
        let kwargs = PyDict::new(py);
        kwargs.set_item("figsize", (width, height)).unwrap();
        let fig = getattr!(py, pyplot, "figure")
            .call(py, (), Some(kwargs))
            .map_err(Error::Python)?;
        let ax = fig.call_method0(py, intern!(py, "subplots"))
            .map_err(Error::Python)?;
        Ok((Figure { fig }, Axes { ax }))
    })
}

/// Run the GUI event loop and display all open figures.
///
/// Headless environments fail here; once the figure is on disk the
/// caller may report the failure and carry on.
pub fn show() -> Result<(), Error> {
    let pyplot = pymod!(PYPLOT)?;
    Python::with_gil(|py| {
        getattr!(py, pyplot, "show").call0(py).map_err(Error::Python)?;
        Ok(())
    })
}

impl Figure {
    pub fn save(&self) -> Savefig {
        Savefig { fig: self.fig.clone() }
    }
}

pub struct Savefig {
    fig: PyObject,
}

impl Savefig {
    /// Write the figure to `path`, overwriting any existing file.  The
    /// format follows the extension (".pdf" for the paper's figures).
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        Python::with_gil(|py| {
            self.fig.call_method1(
                py, intern!(py, "savefig"),
                (path.as_ref(),)
            ).map_err(|e| {
                    if e.is_instance_of::<PyFileNotFoundError>(py) {
                        Error::FileNotFound(path.as_ref().to_path_buf())
                    } else if e.is_instance_of::<PyPermissionError>(py) {
                        Error::PermissionError
                    } else {
                        Error::Python(e)
                    }
                })
        })?;
        Ok(())
    }
}

impl Axes {
    /// Plot `y` versus `x` as a connected line.
    #[must_use]
    pub fn line<'a, D>(&'a mut self, x: &'a D, y: &'a D) -> Line<'a, D>
    where D: Data + ?Sized {
        // The chain starts with the data so that options may be added
        // before the final `.plot()` mutates the underlying Python
        // object.
        Line { axes: self, x, y, label: "", linewidth: None }
    }

    /// Plot `y` versus `x` as discrete markers.
    #[must_use]
    pub fn scatter<'a, D>(&'a mut self, x: &'a D, y: &'a D) -> Scatter<'a, D>
    where D: Data + ?Sized {
        Scatter { axes: self, x, y, color: "", size: None, label: "" }
    }

    pub fn set_title(&mut self, label: &str, fontsize: f64) -> &mut Self {
        meth!(self.ax, set_title, py -> (label,), {
            let kwargs = PyDict::new(py);
            kwargs.set_item("fontsize", fontsize).unwrap();
            Some(kwargs)
        }).unwrap();
        self
    }

    pub fn set_xlabel(&mut self, label: &str) -> &mut Self {
        meth!(self.ax, set_xlabel, (label,)).unwrap();
        self
    }

    pub fn set_ylabel(&mut self, label: &str) -> &mut Self {
        meth!(self.ax, set_ylabel, (label,)).unwrap();
        self
    }

    pub fn legend(&mut self, frameon: bool) -> &mut Self {
        meth!(self.ax, legend, py -> (), {
            let kwargs = PyDict::new(py);
            kwargs.set_item("frameon", frameon).unwrap();
            Some(kwargs)
        }).unwrap();
        self
    }

    pub fn grid(&mut self, visible: bool) -> &mut Self {
        meth!(self.ax, grid, (visible,)).unwrap();
        self
    }

    pub fn minorticks_on(&mut self) -> &mut Self {
        meth!(self.ax, minorticks_on, ()).unwrap();
        self
    }

    /// Draw major and minor ticks on all four sides, pointing inward.
    pub fn ticks_inward(&mut self) -> &mut Self {
        meth!(self.ax, tick_params, py -> (), {
            let kwargs = PyDict::new(py);
            kwargs.set_item("axis", "both").unwrap();
            kwargs.set_item("which", "both").unwrap();
            kwargs.set_item("direction", "in").unwrap();
            kwargs.set_item("top", true).unwrap();
            kwargs.set_item("right", true).unwrap();
            Some(kwargs)
        }).unwrap();
        self
    }
}

// Read-back of what actually landed on the axes, for the test suite.
#[cfg(test)]
impl Figure {
    /// The axes added to this figure, in order.
    fn axes(&self) -> Vec<Axes> {
        Python::with_gil(|py| {
            let axs = self.fig.getattr(py, intern!(py, "axes")).unwrap();
            let axs: &pyo3::types::PyList = axs.downcast(py).unwrap();
            axs.iter().map(|ax| Axes { ax: ax.into_py(py) }).collect()
        })
    }
}

#[cfg(test)]
impl Axes {
    /// X and Y of the `i`-th line series, as plotted.
    fn line_data(&self, i: usize) -> (Vec<f64>, Vec<f64>) {
        Python::with_gil(|py| {
            let line = self.ax.getattr(py, intern!(py, "lines")).unwrap()
                .call_method1(py, intern!(py, "__getitem__"), (i,)).unwrap();
            let xy = line.call_method0(py, intern!(py, "get_xydata")).unwrap();
            split_xy(py, &xy)
        })
    }

    /// X and Y offsets of the `i`-th collection (scatter) series.
    fn scatter_data(&self, i: usize) -> (Vec<f64>, Vec<f64>) {
        Python::with_gil(|py| {
            let coll = self.ax.getattr(py, intern!(py, "collections")).unwrap()
                .call_method1(py, intern!(py, "__getitem__"), (i,)).unwrap();
            let xy = coll.call_method0(py, intern!(py, "get_offsets")).unwrap();
            split_xy(py, &xy)
        })
    }
}

/// Split an (n, 2) array of points into its x and y columns.
#[cfg(test)]
fn split_xy(py: Python, xy: &PyObject) -> (Vec<f64>, Vec<f64>) {
    let xy: &numpy::PyArray2<f64> = xy.downcast(py).unwrap();
    let xy = xy.readonly();
    let xy = xy.as_array();
    (xy.column(0).to_vec(), xy.column(1).to_vec())
}

/// Options for a line series; built by [`Axes::line`].
#[must_use]
pub struct Line<'a, D>
where D: ?Sized {
    axes: &'a Axes,
    x: &'a D,
    y: &'a D,
    label: &'a str,
    linewidth: Option<f64>,
}

impl<'a, D> Line<'a, D>
where D: Data + ?Sized {
    pub fn label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }

    pub fn linewidth(mut self, w: f64) -> Self {
        self.linewidth = Some(w);
        self
    }

    /// Plot the data with the options specified in [`Line`].
    pub fn plot(self) {
        Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            if !self.label.is_empty() {
                kwargs.set_item("label", self.label).unwrap()
            }
            if let Some(w) = self.linewidth {
                kwargs.set_item("linewidth", w).unwrap()
            }
            let xn = self.x.to_numpy(py);
            let yn = self.y.to_numpy(py);
            self.axes.ax.call_method(py, intern!(py, "plot"), (xn, yn),
                                     Some(kwargs)).unwrap();
        })
    }
}

/// Options for a scatter series; built by [`Axes::scatter`].
#[must_use]
pub struct Scatter<'a, D>
where D: ?Sized {
    axes: &'a Axes,
    x: &'a D,
    y: &'a D,
    color: &'a str,
    size: Option<f64>,
    label: &'a str,
}

impl<'a, D> Scatter<'a, D>
where D: Data + ?Sized {
    pub fn color(mut self, color: &'a str) -> Self {
        self.color = color;
        self
    }

    /// Marker size in points², matplotlib's `s` keyword.
    pub fn size(mut self, s: f64) -> Self {
        self.size = Some(s);
        self
    }

    pub fn label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }

    /// Plot the data with the options specified in [`Scatter`].
    pub fn draw(self) {
        Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            if !self.color.is_empty() {
                kwargs.set_item("color", self.color).unwrap()
            }
            if let Some(s) = self.size {
                kwargs.set_item("s", s).unwrap()
            }
            if !self.label.is_empty() {
                kwargs.set_item("label", self.label).unwrap()
            }
            let xn = self.x.to_numpy(py);
            let yn = self.y.to_numpy(py);
            self.axes.ax.call_method(py, intern!(py, "scatter"), (xn, yn),
                                     Some(kwargs)).unwrap();
        })
    }
}


////////////////////////////////////////////////////////////////////////
//
// The comparison figure

/// Assemble the figure for the unsymmetric detuning regime: the
/// published curve as a line, our results as green markers, both
/// against system size N.
///
/// The caller saves it (and, optionally, shows it).
pub fn comparison_figure(data: &Dataset) -> Result<Figure, Error> {
    set_style()?;
    let (fig, mut ax) = subplots(10., 8.)?;
    ax.ticks_inward();
    ax.minorticks_on();
    ax.line(&data.n_sites, &data.tp_reference)
        .label("Rogerro(2021)")
        .plot();
    ax.scatter(&data.n_sites, &data.tp_computed)
        .color("g")
        .size(70.)
        .label("Our results")
        .draw();
    ax.set_xlabel("System size N");
    ax.set_ylabel(r"Minimum time $t_p$ [$\mu^{-1}$]");
    ax.set_title(
        r"Rogerro(2021) Fig. 3(b) for an unsymmetric $\delta_{\omega}$=$\mu / 4$",
        24.);
    ax.legend(false);
    ax.grid(false);
    Ok(fig)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dat(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("N_tpRog_tpmine.dat");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_three_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "4 1.0 1.1\n8 2.0 2.3\n24 5.0 5.4\n");
        let data = Dataset::load(&path).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.n_sites, [4., 8., 24.]);
        assert_eq!(data.tp_reference, [1.0, 2.0, 5.0]);
        assert_eq!(data.tp_computed, [1.1, 2.3, 5.4]);
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "# N tpRog tpmine\n\n4 1.0 1.1\n\n8 2.0 2.3\n");
        let data = Dataset::load(&path).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.n_sites, [4., 8.]);
    }

    #[test]
    fn ragged_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "4 1.0 1.1\n8 2.0\n");
        match Dataset::load(&path) {
            Err(Error::Columns { line: 2, expected: 3, found: 2, .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn extra_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "4 1.0 1.1 9.9\n8 2.0 2.3 9.9\n");
        match Dataset::load(&path) {
            Err(Error::Columns { expected: 3, found: 4, .. }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn bad_token_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "4 1.0 1.1\n8 nan? 2.3\n");
        match Dataset::load(&path) {
            Err(Error::Number { line: 2, ref token, .. })
                if token == "nan?" => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.dat");
        match Dataset::load(&path) {
            Err(Error::FileNotFound(p)) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "# header only\n\n");
        assert!(matches!(Dataset::load(&path), Err(Error::Empty(_))));
    }

    #[test]
    fn path_template() {
        assert_eq!(
            data_path(4, 24),
            Path::new("misc/datafiles/Rog/N_start_4/N_stop_24\
                       /N_tpRog_tpmine.dat"));
    }

    #[test]
    fn load_table_is_value_preserving() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dat(&dir, "4 0.25 1e-3\n8 -2.5 3.125\n");
        let table = load_table(&path).unwrap();
        assert_eq!(table.nrows(), 2);
        assert_eq!(table[[0, 1]], 0.25);
        assert_eq!(table[[0, 2]], 1e-3);
        assert_eq!(table[[1, 1]], -2.5);
        assert_eq!(table[[1, 2]], 3.125);
    }

    fn sample() -> Dataset {
        Dataset {
            n_sites: vec![4., 8., 24.],
            tp_reference: vec![1.0, 2.0, 5.0],
            tp_computed: vec![1.1, 2.3, 5.4],
        }
    }

    #[test]
    fn comparison_pdf() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("comparison.pdf");
        let fig = comparison_figure(&sample())?;
        fig.save().to_file(&out)?;
        let bytes = fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        Ok(())
    }

    #[test]
    fn save_overwrites() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("comparison.pdf");
        fs::write(&out, b"stale").unwrap();
        let fig = comparison_figure(&sample())?;
        fig.save().to_file(&out)?;
        let bytes = fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        Ok(())
    }

    #[test]
    fn figure_series_match_dataset() -> Result<(), Error> {
        let data = sample();
        let fig = comparison_figure(&data)?;
        let ax = &fig.axes()[0];
        let (x, y) = ax.line_data(0);
        assert_eq!(x, data.n_sites);
        assert_eq!(y, data.tp_reference);
        let (x, y) = ax.scatter_data(0);
        assert_eq!(x, data.n_sites);
        assert_eq!(y, data.tp_computed);
        Ok(())
    }
}
