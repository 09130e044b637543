extern crate nalgebra as na;
use mppi::{Mppi, MppiConfig};
use ndarray::{array, Array1, Array2, Axis};
use rayon::prelude::*;

// cargo run --example point-robot --release

// 予測ホライゾン
const N: usize = 20;
const DT: f64 = 0.05;
const K: usize = 500;

const GOAL: (f64, f64) = (2.0, 2.0);
// 円形障害物 (x, y, r)
const OBSTACLE: (f64, f64, f64) = (1.0, 1.0, 0.4);
const COLLISION: f64 = 1000.0;

// 状態 [x, vx, y, vy], 入力 [ax, ay]
fn dynamics(x: &Array2<f64>, u: &Array2<f64>, _t: Option<usize>) -> (Array2<f64>, Array2<f64>) {
    let mut next = x.clone();
    for (mut r, (x, u)) in next.outer_iter_mut().zip(x.outer_iter().zip(u.outer_iter())) {
        r[1] += u[0] * DT;
        r[3] += u[1] * DT;
        r[0] += x[1] * DT;
        r[2] += x[3] * DT;
    }
    (next, u.clone())
}

fn cost(x: &Array2<f64>, u: &Array2<f64>, _t: usize) -> Array1<f64> {
    let c: Vec<f64> = (0..x.nrows())
        .into_par_iter()
        .map(|k| {
            let (px, py) = (x[[k, 0]], x[[k, 2]]);
            let goal = (px - GOAL.0).powi(2) + (py - GOAL.1).powi(2);
            let vel = 0.1 * (x[[k, 1]].powi(2) + x[[k, 3]].powi(2));
            let effort = 0.01 * (u[[k, 0]].powi(2) + u[[k, 1]].powi(2));
            let hit = (px - OBSTACLE.0).hypot(py - OBSTACLE.1) < OBSTACLE.2;
            goal + vel + effort + if hit { COLLISION } else { 0.0 }
        })
        .collect();
    Array1::from(c)
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;

    let config = MppiConfig {
        num_samples: K,
        horizon: N,
        nx: 4,
        noise_sigma: na::DMatrix::from_diagonal_element(2, 2, 4.0),
        u_max: Some(vec![3.0, 3.0]),
        update_cov: true,
        ..MppiConfig::default()
    };
    let mut mppi = Mppi::new(config, dynamics, cost)?;

    // ログファイルの作成
    std::fs::create_dir_all("logs/mppi")?;
    let mut wtr = csv::Writer::from_path("logs/mppi/point-robot.csv")?;

    let mut x = array![0.0, 0.0, 0.0, 0.0];
    let now = std::time::Instant::now();
    let mut t = 0.0;
    while t < 6.0 {
        let u = mppi.command(x.view())?;
        let (next, _) = dynamics(&x.clone().insert_axis(Axis(0)), &u, None);
        x = next.row(0).to_owned();

        println!(
            "t: {:.2}, u: [{:6.2}, {:6.2}], p: [{:5.2}, {:5.2}]",
            t,
            u[[0, 0]],
            u[[0, 1]],
            x[0],
            x[2]
        );

        wtr.write_record(&[
            t.to_string(),
            u[[0, 0]].to_string(),
            u[[0, 1]].to_string(),
            x[0].to_string(),
            x[2].to_string(),
        ])?;
        wtr.flush()?;

        if (x[0] - GOAL.0).hypot(x[2] - GOAL.1) < 0.05 {
            println!("goal reached");
            break;
        }
        t += DT;
    }
    println!("elapsed: {:.2} sec", now.elapsed().as_secs_f64());
    Ok(())
}
