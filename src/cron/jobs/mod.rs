pub mod update_charts;
