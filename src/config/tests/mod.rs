mod tests_file_config_manager;
