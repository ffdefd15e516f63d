pub mod integration_test_utils;
