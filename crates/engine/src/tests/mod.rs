mod helpers;

mod stats_tests;
