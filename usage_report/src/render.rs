use std::path::{Path, PathBuf};

use anyhow::Result;
use itertools::Itertools as _;
use log::{info, warn};
use plotters::prelude::SVGBackend;
use usage_data::{group_sum, JobTable, NormalizedJob, UserId, UserIdMap};

const FONT_FAMILY: &str = "sans-serif";
const PLOT_SIZE: (u32, u32) = (1400, 900);

/// Memory plot needs more than this many jobs with a known max RSS.
const MIN_JOBS_WITH_RSS: usize = 10;

/// Hands out `plot_<n>.svg`, `n` counting up from 1 for every plot actually written.
#[derive(Debug)]
pub struct PlotFiles {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl PlotFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    fn next_path(&self) -> PathBuf {
        self.dir.join(format!("plot_{}.svg", self.written.len() + 1))
    }

    /// Renders into the next file name. A failed plot is logged and does not use up a number.
    fn render(&mut self, what: &str, draw: impl FnOnce(&Path) -> Result<()>) -> Option<PathBuf> {
        let path = self.next_path();
        match draw(&path) {
            Ok(()) => {
                info!("{what} plot saved to {path:?}");
                self.written.push(path.clone());
                Some(path)
            }
            Err(e) => {
                warn!("{what} plot could not be rendered: {e:#}");
                None
            }
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

/// Total CPU hours per user, smallest first.
pub fn cpu_hours_by_user(table: &JobTable, user_ids: &UserIdMap) -> Vec<(UserId, f64)> {
    group_sum(table.jobs(), |job| user_ids.id_of(&job.raw.user), NormalizedJob::cpu_hours)
        .into_iter()
        .filter_map(|(id, hours)| Some((id?, hours)))
        .sorted_by(|(_, a), (_, b)| a.total_cmp(b))
        .collect()
}

/// (user, max RSS) per job with a known max RSS.
pub fn max_rss_by_user(table: &JobTable, user_ids: &UserIdMap) -> Vec<(UserId, f64)> {
    table
        .jobs()
        .iter()
        .filter(|job| job.max_rss_gb > 0.0)
        .filter_map(|job| Some((user_ids.id_of(&job.raw.user)?, job.max_rss_gb)))
        .collect()
}

/// Every plot this report knows, skipping (with a warning) those without enough data.
pub fn render_all(plots: &mut PlotFiles, table: &JobTable, user_ids: &UserIdMap) {
    let cpu_hours = cpu_hours_by_user(table, user_ids);
    if cpu_hours.is_empty() {
        warn!("No CPU usage data to plot.");
    } else {
        plots.render("CPU Hours by User", |path| {
            plot::cpu_hours_by_user(SVGBackend::new(path, PLOT_SIZE), &cpu_hours)
        });
    }

    let max_rss = max_rss_by_user(table, user_ids);
    let distinct_users = max_rss.iter().map(|(id, _)| id).unique().count();
    if max_rss.len() > MIN_JOBS_WITH_RSS && distinct_users > 1 {
        plots.render("Memory Usage Trends", |path| {
            plot::memory_by_user(SVGBackend::new(path, PLOT_SIZE), &max_rss, user_ids.len())
        });
    } else {
        warn!(
            "No MaxRSS data to plot ({} jobs with a max RSS, {distinct_users} distinct user(s)).",
            max_rss.len()
        );
    }
}

pub mod plot {
    use anyhow::{bail, Result};
    use plotters::prelude::*;
    use usage_data::UserId;

    use super::FONT_FAMILY;

    const MAX_X_LABELS: usize = 40;

    pub(super) const fn title_font_size((w, h): (u32, u32)) -> u32 {
        let avg = (w + h) / 2;
        avg / 30
    }

    fn y_max(values: impl Iterator<Item = f64>) -> f64 {
        let max = values.fold(0f64, f64::max);
        if max > 0.0 {
            max * 1.1
        } else {
            1.0
        }
    }

    /// Bar chart, one bar per user in the given order.
    pub fn cpu_hours_by_user<DB>(backend: DB, dataset: &[(UserId, f64)]) -> Result<()>
    where
        DB: DrawingBackend,
        DB::ErrorType: 'static,
    {
        if dataset.is_empty() {
            bail!("empty dataset");
        }
        let labels = dataset.iter().map(|(id, _)| id.to_string()).collect::<Vec<_>>();

        let drawing_area = backend.into_drawing_area();
        drawing_area.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(
                "Total CPU Hours by User",
                (FONT_FAMILY, title_font_size(drawing_area.dim_in_pixel())).into_font(),
            )
            .margin(10)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(
                (0usize..dataset.len()).into_segmented(),
                0f64..y_max(dataset.iter().map(|(_, hours)| *hours)),
            )?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(dataset.len().min(MAX_X_LABELS))
            .x_label_formatter(&|x| match x {
                SegmentValue::CenterOf(idx) => labels.get(*idx).cloned().unwrap_or_default(),
                _ => String::new(),
            })
            .x_desc("User ID")
            .y_desc("Total CPU Hours")
            .draw()?;

        chart.draw_series(
            Histogram::vertical(&chart)
                .style(BLUE.mix(0.6).filled())
                .margin(2)
                .data(dataset.iter().enumerate().map(|(idx, (_, hours))| (idx, *hours))),
        )?;

        drawing_area.present()?;

        Ok(())
    }

    /// Scatter of max RSS per job over user IDs.
    pub fn memory_by_user<DB>(backend: DB, dataset: &[(UserId, f64)], user_count: usize) -> Result<()>
    where
        DB: DrawingBackend,
        DB::ErrorType: 'static,
    {
        if dataset.is_empty() {
            bail!("empty dataset");
        }

        let drawing_area = backend.into_drawing_area();
        drawing_area.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&drawing_area)
            .caption(
                "Memory Usage Trends",
                (FONT_FAMILY, title_font_size(drawing_area.dim_in_pixel())).into_font(),
            )
            .margin(10)
            .x_label_area_size(50)
            .y_label_area_size(70)
            .build_cartesian_2d(
                -0.5f64..(user_count.max(1) as f64 - 0.5),
                0f64..y_max(dataset.iter().map(|(_, gib)| *gib)),
            )?;

        chart
            .configure_mesh()
            .x_labels(user_count.clamp(1, MAX_X_LABELS))
            .x_label_formatter(&|x| format!("{x:.0}"))
            .x_desc("User ID")
            .y_desc("Max RSS (GB)")
            .draw()?;

        chart.draw_series(
            dataset
                .iter()
                .map(|(id, gib)| Circle::new((id.index() as f64, *gib), 4, RED.mix(0.7).filled())),
        )?;

        drawing_area.present()?;

        Ok(())
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use anyhow::Result;
    use plotters::prelude::SVGBackend;
    use usage_data::{Anonymizer, GpuKey, RawTable, TableFormat};

    use super::*;

    fn table(input: &str) -> Result<JobTable> {
        let anon = Anonymizer::from_secret("test_secret_key")?;
        Ok(RawTable::parse(input, &TableFormat::parsable()).normalize(&anon, GpuKey::Any))
    }

    fn many_jobs() -> String {
        let mut input = String::from("JobID|User|CPUTime|MaxRSS\n");
        for i in 0..12 {
            input.push_str(&format!("{i}|user{}|0{}:00:00|{}M\n", i % 3, i % 4, 512 * (i + 1)));
        }
        input
    }

    #[test]
    fn cpu_hours_by_user__sorted_ascending() -> Result<()> {
        let table = table("JobID|User|CPUTime\n1|alice|05:00:00\n2|bob|01:00:00\n3|alice|01:00:00\n")?;
        let ids = table.user_ids();
        let hours = cpu_hours_by_user(&table, &ids);
        assert_eq!(hours.len(), 2);
        assert_eq!(Some(hours[0].0), ids.id_of("bob"));
        assert_eq!(hours[0].1, 1.0);
        assert_eq!(Some(hours[1].0), ids.id_of("alice"));
        assert_eq!(hours[1].1, 6.0);
        Ok(())
    }

    #[test]
    fn plot__cpu_hours_by_user__renders_svg() -> Result<()> {
        let table = table(&many_jobs())?;
        let ids = table.user_ids();
        let mut svg = String::new();
        plot::cpu_hours_by_user(SVGBackend::with_string(&mut svg, (800, 600)), &cpu_hours_by_user(&table, &ids))?;
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Total CPU Hours by User"));
        assert!(!svg.contains("user0"));
        Ok(())
    }

    #[test]
    fn plot__memory_by_user__renders_svg() -> Result<()> {
        let table = table(&many_jobs())?;
        let ids = table.user_ids();
        let mut svg = String::new();
        plot::memory_by_user(SVGBackend::with_string(&mut svg, (800, 600)), &max_rss_by_user(&table, &ids), ids.len())?;
        assert!(svg.contains("<circle"));
        Ok(())
    }

    #[test]
    fn plot__title_font_size__scales_with_average_side() {
        assert_eq!(plot::title_font_size((1400, 900)), 38);
        assert_eq!(plot::title_font_size((900, 1400)), 38);
        assert_eq!(plot::title_font_size((800, 600)), 23);
    }

    #[test]
    fn plot__empty_dataset_fails() {
        let mut svg = String::new();
        assert!(plot::cpu_hours_by_user(SVGBackend::with_string(&mut svg, (800, 600)), &[]).is_err());
    }

    #[test]
    fn render_all__numbers_plots_from_one() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = table(&many_jobs())?;
        let mut plots = PlotFiles::new(dir.path());
        render_all(&mut plots, &table, &table.user_ids());
        assert_eq!(plots.written(), [dir.path().join("plot_1.svg"), dir.path().join("plot_2.svg")]);
        assert!(plots.written().iter().all(|path| path.is_file()));
        Ok(())
    }

    #[test]
    fn render_all__skips_memory_plot_with_little_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = table("JobID|User|CPUTime|MaxRSS\n1|alice|01:00:00|1G\n2|bob|01:00:00|2G\n")?;
        let mut plots = PlotFiles::new(dir.path());
        render_all(&mut plots, &table, &table.user_ids());
        assert_eq!(plots.written(), [dir.path().join("plot_1.svg")]);
        Ok(())
    }

    #[test]
    fn render_all__empty_table_writes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = table("")?;
        let mut plots = PlotFiles::new(dir.path());
        render_all(&mut plots, &table, &table.user_ids());
        assert!(plots.written().is_empty());
        Ok(())
    }
}
