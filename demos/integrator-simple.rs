extern crate nalgebra as na;
use mppi::{Backend, Mppi, MppiConfig, MppiMode, SampleMethod};
use ndarray::{array, Array1, Array2};

// cargo run --example integrator-simple --release

const N: usize = 15;
const DT: f64 = 0.1;
const TARGET: f64 = 1.0;

// 二重積分器 [p, v]
fn dynamics(x: &Array2<f64>, u: &Array2<f64>, _t: Option<usize>) -> (Array2<f64>, Array2<f64>) {
    let mut r = x.clone();
    let v = x.column(1).to_owned();
    r.column_mut(1).scaled_add(DT, &u.column(0));
    r.column_mut(0).scaled_add(DT, &v);
    (r, u.clone())
}

fn cost(x: &Array2<f64>, _u: &Array2<f64>, _t: usize) -> Array1<f64> {
    x.column(0).mapv(|p| (p - TARGET).powi(2)) + x.column(1).mapv(|v| 0.1 * v * v)
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let config = MppiConfig {
        num_samples: 200,
        horizon: N,
        nx: 2,
        noise_sigma: na::DMatrix::from_element(1, 1, 0.5),
        u_min: Some(vec![-2.0]),
        u_max: Some(vec![2.0]),
        lambda: 0.5,
        mode: MppiMode::Simple,
        sample_method: SampleMethod::Random,
        sample_null_action: true,
        filter_u: false,
        backend: Backend::Serial,
        ..MppiConfig::default()
    };
    let mut mppi = Mppi::new(config, dynamics, cost)?;

    std::fs::create_dir_all("logs/mppi")?;
    let mut wtr = csv::Writer::from_path("logs/mppi/integrator-simple.csv")?;

    let mut x = array![0.0, 0.0];
    let mut t = 0.0;
    while t < 5.0 {
        let u = mppi.command(x.view())?;
        let (next, _) = dynamics(&x.clone().insert_axis(ndarray::Axis(0)), &u, None);
        x = next.row(0).to_owned();

        println!("t: {:.2}, u: {:6.2}, x: [{:5.2}, {:5.2}]", t, u[[0, 0]], x[0], x[1]);
        wtr.write_record(&[t.to_string(), u[[0, 0]].to_string(), x[0].to_string(), x[1].to_string()])?;
        t += DT;
    }
    wtr.flush()?;
    Ok(())
}
