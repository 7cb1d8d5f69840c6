//! 批量测试套件
//!
//! JSON 测试用例文件的解析、结果文件初始化，以及按套件并发的批量运行器。

mod runner;
mod types;


pub use runner::{BatchRunner, ConnectionFactory, SuiteReport};
pub use types::{
    discover_suites, load_test_cases, Scalar, ScalarList, SuiteError, TestCaseSpec,
    JUNIT_FILE_NAME, TC_FILE_NAME,
};
